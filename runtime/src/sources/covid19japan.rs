//! covid19japan.com summary (Japan). National figures come from the last
//! entry of the `daily` series.

use casewatch::raw::keys;
use casewatch::{FetchError, RawFields, RawValue};
use serde_json::Value;

const DAILY_FIELDS: &[(&str, &str)] = &[
    ("confirmedCumulative", keys::INFECTED),
    ("deceasedCumulative", keys::DECEASED),
    ("recoveredCumulative", keys::RECOVERED),
    ("testedCumulative", keys::TESTED),
    ("activeCumulative", keys::ACTIVE),
    ("confirmed", keys::DAILY_INFECTED),
    ("deceased", keys::DAILY_DECEASED),
];

pub fn parse(body: &str) -> Result<RawFields, FetchError> {
    let summary: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::UnexpectedShape(format!("summary is not JSON: {e}")))?;

    let last_day = summary
        .get("daily")
        .and_then(Value::as_array)
        .and_then(|days| days.last())
        .ok_or_else(|| FetchError::UnexpectedShape("summary without daily entries".into()))?;

    let mut raw = RawFields::new();
    for (field, key) in DAILY_FIELDS {
        raw.set_opt(key, last_day.get(*field).and_then(RawValue::from_json));
    }
    if let Some(updated) = summary.get("updated").and_then(RawValue::from_json) {
        raw.set(keys::SOURCE_UPDATED_AT, updated);
    }
    Ok(raw)
}
