//! Country catalog: which sources make up each country's snapshot.

use std::sync::Arc;

use casewatch::raw::keys;
use casewatch::{
    Counter, CountryPlan, ReferenceLinks, Requirement, SourceBinding, SourceConfig, Tolerances,
};
use url::Url;

use super::{ArcgisRegions, ArcgisTotals, HttpExtractor, SourceKind};
use crate::fetch::HttpClient;

/// Countries with a source plan, in display order.
pub const COUNTRIES: [&str; 5] = ["Germany", "India", "Japan", "Netherlands", "Poland"];

const JHU_REFERER: &str = "https://gisanddata.maps.arcgis.com/apps/opsdashboard/index.html";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown country `{0}` (known: {known})", known = COUNTRIES.join(", "))]
    UnknownCountry(String),

    #[error("invalid source URL: {0}")]
    BadUrl(#[from] url::ParseError),
}

/// Canonical spelling of a country name, matched case-insensitively.
pub fn canonical(country: &str) -> Option<&'static str> {
    COUNTRIES
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(country.trim()))
}

/// Lowercase path segment used in read API links.
pub fn slug(country: &str) -> String {
    country.trim().to_ascii_lowercase()
}

/// Build the source plan for one country.
pub fn plan(country: &str, client: &HttpClient) -> Result<CountryPlan, CatalogError> {
    let name = canonical(country).ok_or_else(|| CatalogError::UnknownCountry(country.into()))?;
    let bind = |config: SourceConfig, kind: SourceKind| {
        SourceBinding::new(config, Arc::new(HttpExtractor::new(client.clone(), kind)))
    };

    let (source_url, sources) = match name {
        "Germany" => {
            let url = "https://www.rki.de/DE/Content/InfAZ/N/Neuartiges_Coronavirus/Fallzahlen.html";
            let config = SourceConfig::new("rki", url, Requirement::Mandatory)
                .with_mandatory([Counter::Infected, Counter::Deceased]);
            (url.to_string(), vec![bind(config, SourceKind::RkiTable)])
        }
        "India" => {
            let url = "https://www.mohfw.gov.in/";
            let config = SourceConfig::new("mohfw", url, Requirement::Mandatory)
                .with_mandatory([Counter::Infected, Counter::Deceased, Counter::Recovered]);
            (url.to_string(), vec![bind(config, SourceKind::MohfwDashboard)])
        }
        "Japan" => {
            let summary = SourceConfig::new(
                "covid19japan",
                "https://data.covid19japan.com/summary/latest.json",
                Requirement::Mandatory,
            )
            .with_mandatory([Counter::Infected, Counter::Deceased]);
            let prefectures = SourceConfig::new(
                "prefectures",
                arcgis_query(
                    "https://services8.arcgis.com/JdxivnCyd1rvJTrY/arcgis/rest/services/covid19_list_csv_EnglishView/FeatureServer/0/query",
                    "確定日 IS NOT NULL",
                    2000,
                )?,
                Requirement::BestEffort,
            );
            (
                "https://covid19japan.com/#all-prefectures".to_string(),
                vec![
                    bind(summary, SourceKind::Covid19JapanSummary),
                    bind(
                        prefectures,
                        SourceKind::ArcgisRegions(ArcgisRegions {
                            name_field: "Prefectures",
                            fields: &[("都道府県別事例数", keys::INFECTED_COUNT)],
                        }),
                    ),
                ],
            )
        }
        "Netherlands" => {
            let service = "https://services9.arcgis.com/N9p5hsImWXAccRNI/arcgis/rest/services/Nc2JKvYFoAEOFCG5JSI6/FeatureServer";
            let totals = SourceConfig::new(
                "jhu-totals",
                arcgis_query(&format!("{service}/2/query"), "Recovered<>0", 250)?,
                Requirement::Mandatory,
            )
            .with_mandatory([Counter::Infected])
            .with_header("referer", JHU_REFERER);
            let provinces = SourceConfig::new(
                "jhu-provinces",
                arcgis_query(&format!("{service}/3/query"), "Country_Region='Netherlands'", 75)?,
                Requirement::BestEffort,
            )
            .with_header("referer", JHU_REFERER);
            let dashboard = SourceConfig::new(
                "coronadashboard",
                "https://coronadashboard.government.nl/landelijk/positief-geteste-mensen",
                Requirement::BestEffort,
            );
            (
                "https://www.rivm.nl/en/novel-coronavirus-covid-19/current-information".to_string(),
                vec![
                    bind(
                        totals,
                        SourceKind::ArcgisTotals(ArcgisTotals {
                            filter: Some(("Country_Region", "Netherlands")),
                            fields: &[
                                ("Confirmed", keys::INFECTED),
                                ("Deaths", keys::DECEASED),
                                ("Recovered", keys::RECOVERED),
                            ],
                        }),
                    ),
                    bind(
                        provinces,
                        SourceKind::ArcgisRegions(ArcgisRegions {
                            name_field: "Province_State",
                            fields: &[
                                ("Confirmed", keys::INFECTED_COUNT),
                                ("Deaths", keys::DECEASED_COUNT),
                            ],
                        }),
                    ),
                    bind(dashboard, SourceKind::NextDataDashboard),
                ],
            )
        }
        "Poland" => {
            let service = "https://services-eu1.arcgis.com/zk7YlClTgerl62BY/arcgis/rest/services";
            let summary = SourceConfig::new(
                "rcb-summary",
                arcgis_query(&format!("{service}/global_corona_actualne_widok3/FeatureServer/0/query"), "1=1", 1)?,
                Requirement::Mandatory,
            )
            .with_mandatory([Counter::Infected, Counter::Deceased]);
            let voivodeships = SourceConfig::new(
                "rcb-voivodeships",
                arcgis_query(&format!("{service}/wojewodztwa_corona_widok/FeatureServer/0/query"), "1=1", 25)?,
                Requirement::BestEffort,
            );
            (
                "https://www.gov.pl/web/koronawirus/wykaz-zarazen-koronawirusem-sars-cov-2"
                    .to_string(),
                vec![
                    bind(
                        summary,
                        SourceKind::ArcgisTotals(ArcgisTotals {
                            filter: None,
                            fields: &[
                                ("LICZBA_ZAKAZEN", keys::INFECTED),
                                ("LICZBA_ZGONOW", keys::DECEASED),
                                ("LICZBA_OZDROWIENCOW", keys::RECOVERED),
                                ("AKTUALNE_ZAKAZENIA", keys::ACTIVE),
                                ("ZAKAZENIA_DZIENNE", keys::DAILY_INFECTED),
                                ("ZGONY_DZIENNE", keys::DAILY_DECEASED),
                                ("TESTY", keys::DAILY_TESTED),
                                ("Data", keys::SOURCE_UPDATED_AT),
                            ],
                        }),
                    ),
                    bind(
                        voivodeships,
                        SourceKind::ArcgisRegions(ArcgisRegions {
                            name_field: "jpt_nazwa_",
                            fields: &[
                                ("SUM_Confirmed", keys::INFECTED_COUNT),
                                ("SUM_Deaths", keys::DECEASED_COUNT),
                                ("SUM_Recovered", keys::RECOVERED_COUNT),
                                ("TESTY", keys::TESTED_COUNT),
                            ],
                        }),
                    ),
                ],
            )
        }
        other => return Err(CatalogError::UnknownCountry(other.into())),
    };

    let slug = slug(name);
    Ok(CountryPlan {
        country: name.to_string(),
        source_url,
        links: ReferenceLinks {
            latest: Some(format!("/api/v1/countries/{slug}/latest")),
            history: Some(format!("/api/v1/countries/{slug}/history")),
            readme: None,
        },
        sources,
        tolerances: tolerances(name),
    })
}

/// Countries whose published infected count is routinely revised downwards.
fn tolerances(country: &str) -> Option<Tolerances> {
    match country {
        "Netherlands" => Some(Tolerances {
            infected: 10,
            ..Tolerances::default()
        }),
        _ => None,
    }
}

/// Plans for several countries; the first unknown name aborts.
pub fn plans(countries: &[String], client: &HttpClient) -> Result<Vec<CountryPlan>, CatalogError> {
    countries.iter().map(|c| plan(c, client)).collect()
}

/// A standard ArcGIS feature query returning every attribute as JSON.
fn arcgis_query(endpoint: &str, filter: &str, limit: u32) -> Result<String, CatalogError> {
    let limit = limit.to_string();
    let url = Url::parse_with_params(
        endpoint,
        [
            ("f", "json"),
            ("where", filter),
            ("returnGeometry", "false"),
            ("spatialRel", "esriSpatialRelIntersects"),
            ("outFields", "*"),
            ("resultOffset", "0"),
            ("resultRecordCount", limit.as_str()),
            ("cacheHint", "true"),
        ],
    )?;
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        HttpClient::new(1_000)
    }

    #[test]
    fn test_every_country_has_a_plan() {
        for country in COUNTRIES {
            let plan = plan(country, &client()).unwrap();
            assert_eq!(plan.country, country);
            assert!(!plan.sources.is_empty());
            assert!(
                plan.sources.iter().any(|s| s.config.is_mandatory()),
                "{country} needs a mandatory source"
            );
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let plan = plan("  netherlands ", &client()).unwrap();
        assert_eq!(plan.country, "Netherlands");
        assert_eq!(plan.sources.len(), 3);
        assert_eq!(
            plan.links.latest.as_deref(),
            Some("/api/v1/countries/netherlands/latest")
        );
    }

    #[test]
    fn test_netherlands_tolerates_small_infected_drops() {
        let dutch = plan("Netherlands", &client()).unwrap();
        let tolerances = dutch.tolerances.unwrap();
        assert_eq!(tolerances.infected, 10);
        assert_eq!(tolerances.deceased, Tolerances::default().deceased);

        assert!(plan("Germany", &client()).unwrap().tolerances.is_none());
    }

    #[test]
    fn test_unknown_country() {
        let err = plan("Atlantis", &client()).err().unwrap();
        assert!(matches!(err, CatalogError::UnknownCountry(c) if c == "Atlantis"));
    }

    #[test]
    fn test_arcgis_query_encodes_filter() {
        let url = arcgis_query("https://example.org/FeatureServer/3/query", "Country_Region='Netherlands'", 75)
            .unwrap();
        assert!(url.contains("where=Country_Region%3D%27Netherlands%27"));
        assert!(url.contains("resultRecordCount=75"));
        assert!(url.starts_with("https://example.org/FeatureServer/3/query?f=json"));
    }

    #[test]
    fn test_best_effort_sources_carry_no_mandatory_fields() {
        let plan = plan("Japan", &client()).unwrap();
        let regions = &plan.sources[1].config;
        assert_eq!(regions.requirement, Requirement::BestEffort);
        assert!(regions.mandatory_fields.is_empty());
    }
}
