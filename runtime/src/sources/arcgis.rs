//! ArcGIS FeatureServer query results.
//!
//! Both layouts read `features[].attributes` and rename attributes to raw
//! field keys. A query that fails server-side still answers 200 with an
//! `error` object, which is reported as an unexpected shape.

use std::collections::HashMap;

use casewatch::raw::keys;
use casewatch::{FetchError, RawFields, RawRow, RawValue};
use serde::Deserialize;
use serde_json::{Map, Value};

/// `(attribute name, raw field key)` pairs.
pub type FieldMap = &'static [(&'static str, &'static str)];

#[derive(Debug, Deserialize)]
struct FeatureSet {
    #[serde(default)]
    features: Option<Vec<Feature>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    attributes: Map<String, Value>,
}

fn features(body: &str) -> Result<Vec<Feature>, FetchError> {
    let set: FeatureSet = serde_json::from_str(body)
        .map_err(|e| FetchError::UnexpectedShape(format!("not a feature set: {e}")))?;
    if let Some(error) = set.error {
        return Err(FetchError::UnexpectedShape(format!("query error: {error}")));
    }
    set.features
        .ok_or_else(|| FetchError::UnexpectedShape("feature set without features".into()))
}

/// One feature carrying national totals.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcgisTotals {
    /// Only features whose attribute equals the value are considered.
    pub filter: Option<(&'static str, &'static str)>,
    pub fields: FieldMap,
}

impl ArcgisTotals {
    pub fn parse(&self, body: &str) -> Result<RawFields, FetchError> {
        let features = features(body)?;
        let feature = features
            .iter()
            .find(|f| match self.filter {
                Some((attr, expected)) => f.attributes.get(attr).and_then(Value::as_str) == Some(expected),
                None => true,
            })
            .ok_or_else(|| match self.filter {
                Some((attr, expected)) => {
                    FetchError::UnexpectedShape(format!("no feature with {attr} = {expected}"))
                }
                None => FetchError::UnexpectedShape("empty feature set".into()),
            })?;

        let mut raw = RawFields::new();
        for (attr, key) in self.fields {
            raw.set_opt(key, feature.attributes.get(*attr).and_then(RawValue::from_json));
        }
        Ok(raw)
    }
}

/// One feature per region.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcgisRegions {
    /// Attribute holding the region name.
    pub name_field: &'static str,
    /// Attributes mapped to region keys such as `infectedCount`.
    pub fields: FieldMap,
}

impl ArcgisRegions {
    /// Parse region rows. A region listed more than once keeps its first
    /// position and its last values.
    pub fn parse(&self, body: &str) -> Result<RawFields, FetchError> {
        let mut rows: Vec<RawRow> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for feature in features(body)? {
            let Some(name) = feature
                .attributes
                .get(self.name_field)
                .and_then(RawValue::from_json)
                .map(|v| v.describe().trim().to_string())
                .filter(|n| !n.is_empty())
            else {
                continue;
            };

            let mut row = RawRow::new();
            row.insert(keys::REGION.into(), RawValue::from(name.as_str()));
            for (attr, key) in self.fields {
                if let Some(value) = feature.attributes.get(*attr).and_then(RawValue::from_json) {
                    row.insert(key.to_string(), value);
                }
            }

            match index.get(&name) {
                Some(&at) => rows[at] = row,
                None => {
                    index.insert(name, rows.len());
                    rows.push(row);
                }
            }
        }

        let mut raw = RawFields::new();
        for row in rows {
            raw.push_region(row);
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOTALS: ArcgisTotals = ArcgisTotals {
        filter: Some(("Country_Region", "Netherlands")),
        fields: &[
            ("Confirmed", keys::INFECTED),
            ("Deaths", keys::DECEASED),
            ("Recovered", keys::RECOVERED),
        ],
    };

    #[test]
    fn test_totals_respect_filter() {
        let body = r#"{"features":[
            {"attributes":{"Country_Region":"Belgium","Confirmed":9134,"Deaths":353,"Recovered":1063}},
            {"attributes":{"Country_Region":"Netherlands","Confirmed":8603,"Deaths":546,"Recovered":null}}
        ]}"#;
        let raw = TOTALS.parse(body).unwrap();
        assert_eq!(raw.get(keys::INFECTED), Some(&RawValue::Integer(8603)));
        assert_eq!(raw.get(keys::DECEASED), Some(&RawValue::Integer(546)));
        assert!(raw.get(keys::RECOVERED).is_none());
    }

    #[test]
    fn test_totals_missing_country() {
        let err = TOTALS
            .parse(r#"{"features":[{"attributes":{"Country_Region":"Belgium"}}]}"#)
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape(m) if m.contains("Netherlands")));
    }

    #[test]
    fn test_query_error_payload() {
        let err = TOTALS
            .parse(r#"{"error":{"code":400,"message":"Invalid query parameters"}}"#)
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape(m) if m.contains("query error")));
    }

    #[test]
    fn test_epoch_timestamp_kept_raw() {
        let layout = ArcgisTotals {
            filter: None,
            fields: &[("LICZBA_ZAKAZEN", keys::INFECTED), ("Data", keys::SOURCE_UPDATED_AT)],
        };
        let raw = layout
            .parse(r#"{"features":[{"attributes":{"LICZBA_ZAKAZEN":2554,"Data":1585828800000}}]}"#)
            .unwrap();
        assert_eq!(
            raw.get(keys::SOURCE_UPDATED_AT),
            Some(&RawValue::Integer(1_585_828_800_000))
        );
    }

    #[test]
    fn test_regions_dedupe_by_name() {
        let layout = ArcgisRegions {
            name_field: "Prefectures",
            fields: &[("都道府県別事例数", keys::INFECTED_COUNT)],
        };
        let body = r#"{"features":[
            {"attributes":{"Prefectures":"Tokyo","都道府県別事例数":10}},
            {"attributes":{"Prefectures":"Osaka","都道府県別事例数":4}},
            {"attributes":{"Prefectures":"Tokyo","都道府県別事例数":12}},
            {"attributes":{"Prefectures":null,"都道府県別事例数":1}}
        ]}"#;
        let raw = layout.parse(body).unwrap();
        assert_eq!(raw.regions.len(), 2);
        assert_eq!(raw.regions[0].get(keys::REGION), Some(&RawValue::from("Tokyo")));
        assert_eq!(raw.regions[0].get(keys::INFECTED_COUNT), Some(&RawValue::Integer(12)));
        assert!(raw.regions[0].get(keys::DECEASED_COUNT).is_none());
    }
}
