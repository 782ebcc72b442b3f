//! Next.js dashboards that ship their page data as JSON inside
//! `<script id="__NEXT_DATA__">` (Netherlands daily figures).

use casewatch::raw::keys;
use casewatch::{FetchError, RawFields, RawValue};
use scraper::Html;
use serde_json::Value;

use super::selector;

const POINTERS: &[(&str, &str)] = &[
    (
        "/props/pageProps/data/infected_people_total/last_value/infected_daily_total",
        keys::DAILY_INFECTED,
    ),
    (
        "/props/pageProps/data/deceased_rivm/last_value/covid_daily",
        keys::DAILY_DECEASED,
    ),
    (
        "/props/pageProps/data/reproduction_index_last_known_average/last_value/reproduction_index_avg",
        keys::REPRODUCTION_NUMBER,
    ),
];

pub fn parse(html: &str) -> Result<RawFields, FetchError> {
    let document = Html::parse_document(html);
    let script = selector("script#__NEXT_DATA__")?;
    let payload: String = document
        .select(&script)
        .next()
        .map(|el| el.text().collect::<String>())
        .ok_or_else(|| FetchError::UnexpectedShape("no __NEXT_DATA__ script".into()))?;

    let data: Value = serde_json::from_str(payload.trim())
        .map_err(|e| FetchError::UnexpectedShape(format!("__NEXT_DATA__ is not JSON: {e}")))?;

    let mut raw = RawFields::new();
    for (pointer, key) in POINTERS {
        raw.set_opt(key, data.pointer(pointer).and_then(RawValue::from_json));
    }
    if raw.is_empty() {
        return Err(FetchError::UnexpectedShape(
            "__NEXT_DATA__ carries none of the expected figures".into(),
        ));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> String {
        format!(
            r#"<html><head></head><body><div id="__next"></div>
            <script id="__NEXT_DATA__" type="application/json">{json}</script></body></html>"#
        )
    }

    #[test]
    fn test_reads_daily_figures() {
        let html = page(
            r#"{"props":{"pageProps":{"data":{
                "infected_people_total":{"last_value":{"infected_daily_total":1083}},
                "deceased_rivm":{"last_value":{"covid_daily":12}},
                "reproduction_index_last_known_average":{"last_value":{"reproduction_index_avg":0.92}}
            }}}}"#,
        );
        let raw = parse(&html).unwrap();
        assert_eq!(raw.get(keys::DAILY_INFECTED), Some(&RawValue::Integer(1083)));
        assert_eq!(raw.get(keys::DAILY_DECEASED), Some(&RawValue::Integer(12)));
        assert_eq!(raw.get(keys::REPRODUCTION_NUMBER), Some(&RawValue::Float(0.92)));
    }

    #[test]
    fn test_partial_payload_keeps_what_exists() {
        let html = page(
            r#"{"props":{"pageProps":{"data":{
                "deceased_rivm":{"last_value":{"covid_daily":4}}
            }}}}"#,
        );
        let raw = parse(&html).unwrap();
        assert_eq!(raw.fields.len(), 1);
    }

    #[test]
    fn test_missing_script() {
        let err = parse("<html><body></body></html>").unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape(_)));
    }

    #[test]
    fn test_unrelated_payload() {
        let err = parse(&page(r#"{"props":{}}"#)).unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedShape(_)));
    }
}
