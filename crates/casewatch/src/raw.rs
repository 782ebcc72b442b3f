//! Raw, source-shaped field records produced by extractors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical keys extractors map their source-specific names onto.
pub mod keys {
    pub const INFECTED: &str = "infected";
    pub const DECEASED: &str = "deceased";
    pub const RECOVERED: &str = "recovered";
    pub const TESTED: &str = "tested";
    pub const ACTIVE: &str = "active";
    pub const DAILY_INFECTED: &str = "dailyInfected";
    pub const DAILY_DECEASED: &str = "dailyDeceased";
    pub const DAILY_TESTED: &str = "dailyTested";
    pub const REPRODUCTION_NUMBER: &str = "reproductionNumber";
    pub const SOURCE_UPDATED_AT: &str = "sourceUpdatedAt";

    pub const REGION: &str = "region";
    pub const INFECTED_COUNT: &str = "infectedCount";
    pub const DECEASED_COUNT: &str = "deceasedCount";
    pub const RECOVERED_COUNT: &str = "recoveredCount";
    pub const TESTED_COUNT: &str = "testedCount";
}

/// A single raw value as found in page text or a JSON response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    /// Convert a JSON scalar; objects, arrays and null have no raw value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(RawValue::Integer)
                .or_else(|| n.as_f64().map(RawValue::Float)),
            serde_json::Value::String(s) => Some(RawValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Text form used in error messages.
    pub fn describe(&self) -> String {
        match self {
            RawValue::Integer(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Text(s) => s.clone(),
        }
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<u64> for RawValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(RawValue::Integer)
            .unwrap_or_else(|_| RawValue::Text(v.to_string()))
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

/// One row of a source's regional table.
pub type RawRow = BTreeMap<String, RawValue>;

/// Raw fields from one source for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFields {
    pub fields: BTreeMap<String, RawValue>,
    #[serde(default)]
    pub regions: Vec<RawRow>,
}

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<RawValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<RawValue>) -> &mut Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Insert only when the source actually reported a value.
    pub fn set_opt<V: Into<RawValue>>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(v) = value {
            self.set(key, v);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    pub fn push_region(&mut self, row: RawRow) {
        self.regions.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.regions.is_empty()
    }

    /// Fold another source's fields in; values already present win.
    ///
    /// Regions are taken wholesale from the first source that has any.
    pub fn merge(&mut self, other: RawFields) {
        for (key, value) in other.fields {
            self.fields.entry(key).or_insert(value);
        }
        if self.regions.is_empty() {
            self.regions = other.regions;
        }
    }
}

/// Build a region row from key/value pairs.
pub fn row<I, V>(pairs: I) -> RawRow
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<RawValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_first_value_wins() {
        let mut a = RawFields::new().with(keys::INFECTED, 100i64);
        let b = RawFields::new()
            .with(keys::INFECTED, 90i64)
            .with(keys::DECEASED, 3i64);
        a.merge(b);
        assert_eq!(a.get(keys::INFECTED), Some(&RawValue::Integer(100)));
        assert_eq!(a.get(keys::DECEASED), Some(&RawValue::Integer(3)));
    }

    #[test]
    fn test_merge_regions_from_first_provider() {
        let mut a = RawFields::new().with(keys::INFECTED, 1i64);
        let mut b = RawFields::new();
        b.push_region(row([(keys::REGION, RawValue::from("A")), (keys::INFECTED_COUNT, 1i64.into())]));
        let mut c = RawFields::new();
        c.push_region(row([(keys::REGION, RawValue::from("B"))]));

        a.merge(b);
        a.merge(c);
        assert_eq!(a.regions.len(), 1);
        assert_eq!(a.regions[0][keys::REGION], RawValue::from("A"));
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(RawValue::from_json(&serde_json::json!(12)), Some(RawValue::Integer(12)));
        assert_eq!(RawValue::from_json(&serde_json::json!(1.25)), Some(RawValue::Float(1.25)));
        assert_eq!(RawValue::from_json(&serde_json::json!("7")), Some(RawValue::from("7")));
        assert_eq!(RawValue::from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_set_opt_skips_none() {
        let mut raw = RawFields::new();
        raw.set_opt::<i64>(keys::TESTED, None);
        raw.set_opt(keys::ACTIVE, Some(4i64));
        assert!(raw.get(keys::TESTED).is_none());
        assert_eq!(raw.get(keys::ACTIVE), Some(&RawValue::Integer(4)));
    }
}
