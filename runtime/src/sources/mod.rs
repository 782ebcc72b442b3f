//! Country data sources: one parser per page or API shape.
//!
//! Parsers are pure functions from a fetched body to [`RawFields`]; the
//! [`HttpExtractor`] glues a parser to the shared [`HttpClient`].

pub mod arcgis;
pub mod catalog;
pub mod covid19japan;
pub mod mohfw;
pub mod nextdata;
pub mod rki;

use async_trait::async_trait;
use casewatch::{Extractor, FetchError, RawFields, SourceConfig};
use scraper::{ElementRef, Selector};

use crate::fetch::HttpClient;

pub use arcgis::{ArcgisRegions, ArcgisTotals};

/// Which parser a source's body goes through.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// RKI case table (Germany).
    RkiTable,
    /// Ministry of Health dashboard (India).
    MohfwDashboard,
    /// ArcGIS feature query holding national totals.
    ArcgisTotals(ArcgisTotals),
    /// ArcGIS feature query with one feature per region.
    ArcgisRegions(ArcgisRegions),
    /// covid19japan.com summary JSON.
    Covid19JapanSummary,
    /// Next.js dashboard embedding its data in `#__NEXT_DATA__`.
    NextDataDashboard,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::RkiTable => "rki_table",
            SourceKind::MohfwDashboard => "mohfw_dashboard",
            SourceKind::ArcgisTotals(_) => "arcgis_totals",
            SourceKind::ArcgisRegions(_) => "arcgis_regions",
            SourceKind::Covid19JapanSummary => "covid19japan_summary",
            SourceKind::NextDataDashboard => "next_data_dashboard",
        }
    }

    /// Run the matching parser over a fetched body.
    pub fn parse(&self, body: &str) -> Result<RawFields, FetchError> {
        match self {
            SourceKind::RkiTable => rki::parse(body),
            SourceKind::MohfwDashboard => mohfw::parse(body),
            SourceKind::ArcgisTotals(layout) => layout.parse(body),
            SourceKind::ArcgisRegions(layout) => layout.parse(body),
            SourceKind::Covid19JapanSummary => covid19japan::parse(body),
            SourceKind::NextDataDashboard => nextdata::parse(body),
        }
    }
}

/// Fetches a source over HTTP and parses it by kind.
pub struct HttpExtractor {
    client: HttpClient,
    kind: SourceKind,
}

impl HttpExtractor {
    pub fn new(client: HttpClient, kind: SourceKind) -> Self {
        Self { client, kind }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawFields, FetchError> {
        let body = self.client.get_text(&source.url, &source.headers).await?;
        let raw = self.kind.parse(&body)?;
        tracing::debug!(
            "{}: {} parsed {} field(s), {} region(s)",
            source.id,
            self.kind.name(),
            raw.fields.len(),
            raw.regions.len()
        );
        Ok(raw)
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css)
        .map_err(|e| FetchError::UnexpectedShape(format!("invalid selector `{css}`: {e:?}")))
}

/// Whitespace-trimmed text content of an element.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_dispatches_to_parser() {
        let err = SourceKind::Covid19JapanSummary.parse("not json").unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape(_)));

        let raw = SourceKind::Covid19JapanSummary
            .parse(r#"{"daily":[{"confirmedCumulative":12}]}"#)
            .unwrap();
        assert!(!raw.is_empty());
    }

    #[test]
    fn test_kind_names_are_distinct() {
        let kinds = [
            SourceKind::RkiTable,
            SourceKind::MohfwDashboard,
            SourceKind::Covid19JapanSummary,
            SourceKind::NextDataDashboard,
        ];
        let mut names: Vec<_> = kinds.iter().map(SourceKind::name).collect();
        names.dedup();
        assert_eq!(names.len(), kinds.len());
    }
}
