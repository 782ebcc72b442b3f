//! Normalization of raw source fields into the canonical snapshot schema.
//!
//! Numbers are parsed permissively: thousands separators, footnote markers and
//! other non-digit noise are stripped. A field that still does not parse is an
//! error only when it is mandatory for one of the sources that delivered data;
//! otherwise it is simply absent. Absent is never collapsed to zero.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{NormalizationError, NormalizationReason};
use crate::raw::{keys, RawFields, RawRow, RawValue};
use crate::types::{truncate_to_minute, Counter, ReferenceLinks, RegionRecord, Snapshot, SnapshotContent};

/// Field path used in errors about region rows.
const REGION_FIELD: &str = "regionBreakdown";

/// What the normalizer needs to know about the sources behind a raw record.
#[derive(Debug, Clone, Default)]
pub struct SourceMeta {
    pub country: String,
    pub source_url: String,
    pub links: ReferenceLinks,
    /// Counters that must be present and parseable.
    pub mandatory: BTreeSet<Counter>,
}

impl SourceMeta {
    pub fn new(country: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            source_url: source_url.into(),
            ..Self::default()
        }
    }

    pub fn with_mandatory(mut self, counters: impl IntoIterator<Item = Counter>) -> Self {
        self.mandatory.extend(counters);
        self
    }

    fn is_mandatory(&self, counter: Counter) -> bool {
        self.mandatory.contains(&counter)
    }
}

/// Turn raw fields into a snapshot observed at `run_clock` (truncated to the minute).
pub fn normalize(
    raw: RawFields,
    meta: &SourceMeta,
    run_clock: DateTime<Utc>,
) -> Result<Snapshot, NormalizationError> {
    let mut content = SnapshotContent::new(meta.country.clone(), meta.source_url.clone());
    content.links = meta.links.clone();

    for counter in Counter::TOP_LEVEL {
        let value = match raw.get(counter.key()) {
            Some(v) => match parse_count(v) {
                Ok(n) => Some(n),
                Err(reason) if meta.is_mandatory(counter) => {
                    return Err(NormalizationError::new(counter.key(), reason));
                }
                Err(reason) => {
                    tracing::debug!("{}: optional {counter} dropped: {reason}", meta.country);
                    None
                }
            },
            None => None,
        };
        content.set_counter(counter, value);
    }

    content.daily_infected = optional(&raw, keys::DAILY_INFECTED, parse_delta, &meta.country);
    content.daily_deceased = optional(&raw, keys::DAILY_DECEASED, parse_delta, &meta.country);
    content.daily_tested = optional(&raw, keys::DAILY_TESTED, parse_delta, &meta.country);
    content.reproduction_number =
        optional(&raw, keys::REPRODUCTION_NUMBER, parse_rate, &meta.country);
    content.source_updated_at =
        optional(&raw, keys::SOURCE_UPDATED_AT, parse_timestamp, &meta.country);

    let regions = normalize_regions(&raw.regions, meta, content.infected.is_some())?;
    content.region_breakdown = regions.records;
    derive_totals(&mut content, regions.complete);

    for counter in &meta.mandatory {
        if content.counter(*counter).is_none() {
            return Err(NormalizationError::new(
                counter.key(),
                NormalizationReason::Missing,
            ));
        }
    }

    Ok(Snapshot::new(content, run_clock))
}

fn optional<T>(
    raw: &RawFields,
    key: &str,
    parse: fn(&RawValue) -> Result<T, NormalizationReason>,
    country: &str,
) -> Option<T> {
    let value = raw.get(key)?;
    match parse(value) {
        Ok(v) => Some(v),
        Err(reason) => {
            tracing::debug!("{country}: optional {key} dropped: {reason}");
            None
        }
    }
}

/// Region records plus whether every named region made it into them.
struct Regions {
    records: Vec<RegionRecord>,
    complete: bool,
}

/// A row with an unreadable infected count is an error only when the
/// mandatory infected total has to come from the regions.
fn normalize_regions(
    rows: &[RawRow],
    meta: &SourceMeta,
    infected_reported: bool,
) -> Result<Regions, NormalizationError> {
    let mut records = Vec::with_capacity(rows.len());
    let mut seen = HashSet::new();
    let mut complete = true;
    let strict = meta.is_mandatory(Counter::Infected) && !infected_reported;

    for row in rows {
        let name = match row.get(keys::REGION) {
            Some(v) => v.describe().trim().to_string(),
            None => String::new(),
        };
        if name.is_empty() {
            tracing::debug!("{}: region row without a name dropped", meta.country);
            continue;
        }

        let infected = match row.get(keys::INFECTED_COUNT).map(parse_count) {
            Some(Ok(n)) => n,
            unreadable => {
                if strict {
                    let reason = match unreadable {
                        Some(Err(reason)) => reason,
                        _ => NormalizationReason::Missing,
                    };
                    return Err(NormalizationError::new(
                        format!("{REGION_FIELD}.{name}.{}", keys::INFECTED_COUNT),
                        reason,
                    ));
                }
                tracing::debug!("{}: region {name} without infected count dropped", meta.country);
                complete = false;
                continue;
            }
        };

        if !seen.insert(name.clone()) {
            return Err(NormalizationError::new(
                REGION_FIELD,
                NormalizationReason::DuplicateRegion(name),
            ));
        }

        let count = |key: &str| row.get(key).and_then(|v| parse_count(v).ok());
        records.push(RegionRecord {
            infected_count: infected,
            deceased_count: count(keys::DECEASED_COUNT),
            recovered_count: count(keys::RECOVERED_COUNT),
            tested_count: count(keys::TESTED_COUNT),
            region: name,
        });
    }

    Ok(Regions {
        records,
        complete,
    })
}

/// Fill unreported infected/deceased totals from the region breakdown.
///
/// A region dropped for an unreadable infected count makes both totals
/// unknown, not smaller.
fn derive_totals(content: &mut SnapshotContent, complete: bool) {
    if content.region_breakdown.is_empty() || !complete {
        return;
    }

    if content.infected.is_none() {
        let sum = content
            .region_breakdown
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.infected_count));
        content.infected = Some(sum);
        content.derived_totals.push(Counter::Infected);
    }

    if content.deceased.is_none() {
        // One region without a death count makes the total unknown, not smaller.
        let sum = content
            .region_breakdown
            .iter()
            .map(|r| r.deceased_count)
            .try_fold(0u64, |acc, d| d.map(|d| acc.saturating_add(d)));
        if let Some(sum) = sum {
            content.deceased = Some(sum);
            content.derived_totals.push(Counter::Deceased);
        }
    }
}

/// Parse a non-negative count, stripping separators and noise.
pub fn parse_count(value: &RawValue) -> Result<u64, NormalizationReason> {
    match value {
        RawValue::Integer(i) => {
            u64::try_from(*i).map_err(|_| NormalizationReason::NotAnInteger(i.to_string()))
        }
        RawValue::Float(f) => {
            if f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64 {
                Ok(*f as u64)
            } else {
                Err(NormalizationReason::NotAnInteger(f.to_string()))
            }
        }
        RawValue::Text(s) => {
            let trimmed = s.trim();
            if is_negative(trimmed) {
                return Err(NormalizationReason::NotAnInteger(s.clone()));
            }
            digits_only(trimmed)
                .ok_or_else(|| NormalizationReason::NotAnInteger(s.clone()))
        }
    }
}

/// Parse a signed daily delta.
pub fn parse_delta(value: &RawValue) -> Result<i64, NormalizationReason> {
    match value {
        RawValue::Integer(i) => Ok(*i),
        RawValue::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Ok(*f as i64)
            } else {
                Err(NormalizationReason::NotAnInteger(f.to_string()))
            }
        }
        RawValue::Text(s) => {
            let trimmed = s.trim();
            let magnitude = digits_only(trimmed)
                .and_then(|n| i64::try_from(n).ok())
                .ok_or_else(|| NormalizationReason::NotAnInteger(s.clone()))?;
            Ok(if is_negative(trimmed) { -magnitude } else { magnitude })
        }
    }
}

/// Parse a non-negative rate such as the reproduction number.
pub fn parse_rate(value: &RawValue) -> Result<f64, NormalizationReason> {
    let parsed = match value {
        RawValue::Integer(i) => Some(*i as f64),
        RawValue::Float(f) => Some(*f),
        RawValue::Text(s) if is_negative(s.trim()) => None,
        RawValue::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .map(|c| if c == ',' { '.' } else { c })
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            cleaned.parse::<f64>().ok()
        }
    };
    match parsed {
        Some(f) if f.is_finite() && f >= 0.0 => Ok(f),
        _ => Err(NormalizationReason::NotANumber(value.describe())),
    }
}

/// Parse a source timestamp: RFC 3339 text or epoch milliseconds.
pub fn parse_timestamp(value: &RawValue) -> Result<DateTime<Utc>, NormalizationReason> {
    let parsed = match value {
        RawValue::Integer(ms) => Utc.timestamp_millis_opt(*ms).single(),
        RawValue::Float(ms) if ms.is_finite() => Utc.timestamp_millis_opt(*ms as i64).single(),
        RawValue::Float(_) => None,
        RawValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    };
    parsed
        .map(truncate_to_minute)
        .ok_or_else(|| NormalizationReason::BadTimestamp(value.describe()))
}

fn is_negative(text: &str) -> bool {
    text.strip_prefix('-')
        .map(|rest| rest.trim_start().starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn digits_only(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::row;
    use chrono::TimeZone;

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 4, 2, 10, 15, 42).unwrap()
    }

    fn meta() -> SourceMeta {
        SourceMeta::new("Poland", "https://example.org/pl")
    }

    fn region(name: &str, infected: i64, deceased: Option<i64>) -> RawRow {
        let mut r = row([(keys::REGION, RawValue::from(name)), (keys::INFECTED_COUNT, infected.into())]);
        if let Some(d) = deceased {
            r.insert(keys::DECEASED_COUNT.to_string(), d.into());
        }
        r
    }

    #[test]
    fn test_parse_count_permissive() {
        assert_eq!(parse_count(&"12,345".into()), Ok(12_345));
        assert_eq!(parse_count(&"1.234".into()), Ok(1_234));
        assert_eq!(parse_count(&" 4 567* ".into()), Ok(4_567));
        assert_eq!(parse_count(&RawValue::Integer(7)), Ok(7));
        assert_eq!(parse_count(&RawValue::Float(8.0)), Ok(8));
    }

    #[test]
    fn test_parse_count_rejects_garbage() {
        assert!(parse_count(&"".into()).is_err());
        assert!(parse_count(&"n/a".into()).is_err());
        assert!(parse_count(&"-12".into()).is_err());
        assert!(parse_count(&RawValue::Integer(-1)).is_err());
        assert!(parse_count(&RawValue::Float(2.5)).is_err());
        assert!(parse_count(&RawValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_parse_delta_keeps_sign() {
        assert_eq!(parse_delta(&"-1,204".into()), Ok(-1_204));
        assert_eq!(parse_delta(&"+37".into()), Ok(37));
        assert_eq!(parse_delta(&RawValue::Integer(-3)), Ok(-3));
    }

    #[test]
    fn test_parse_rate_decimal_comma() {
        assert_eq!(parse_rate(&"1,04".into()), Ok(1.04));
        assert_eq!(parse_rate(&RawValue::Float(0.87)), Ok(0.87));
        assert!(parse_rate(&RawValue::Float(-0.5)).is_err());
    }

    #[test]
    fn test_parse_timestamp_epoch_millis() {
        let ts = parse_timestamp(&RawValue::Integer(1_585_821_345_000)).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2020, 4, 2, 9, 55, 0).unwrap());
    }

    #[test]
    fn test_observed_at_from_run_clock() {
        let raw = RawFields::new().with(keys::INFECTED, 10i64);
        let snap = normalize(raw, &meta(), clock()).unwrap();
        assert_eq!(snap.observed_at, Utc.with_ymd_and_hms(2020, 4, 2, 10, 15, 0).unwrap());
    }

    #[test]
    fn test_derived_totals_from_regions() {
        let mut raw = RawFields::new();
        raw.push_region(region("A", 10, Some(1)));
        raw.push_region(region("B", 5, Some(0)));

        let snap = normalize(raw, &meta(), clock()).unwrap();
        assert_eq!(snap.content.infected, Some(15));
        assert_eq!(snap.content.deceased, Some(1));
        assert!(snap.content.is_derived(Counter::Infected));
        assert!(snap.content.is_derived(Counter::Deceased));
    }

    #[test]
    fn test_reported_totals_are_not_derived() {
        let mut raw = RawFields::new().with(keys::INFECTED, "20");
        raw.push_region(region("A", 10, Some(1)));
        raw.push_region(region("B", 5, Some(0)));

        let snap = normalize(raw, &meta(), clock()).unwrap();
        assert_eq!(snap.content.infected, Some(20));
        assert!(!snap.content.is_derived(Counter::Infected));
        assert_eq!(snap.content.deceased, Some(1));
        assert_eq!(snap.content.derived_totals, vec![Counter::Deceased]);
    }

    #[test]
    fn test_missing_region_deaths_leave_total_absent() {
        let mut raw = RawFields::new();
        raw.push_region(region("Tokyo", 10, None));
        raw.push_region(region("Osaka", 5, Some(0)));

        let snap = normalize(raw, &meta(), clock()).unwrap();
        assert_eq!(snap.content.infected, Some(15));
        assert_eq!(snap.content.deceased, None);
        assert_eq!(snap.content.region_breakdown[0].deceased_count, None);
    }

    #[test]
    fn test_mandatory_unparseable_fails() {
        let raw = RawFields::new().with(keys::INFECTED, "—");
        let err = normalize(raw, &meta().with_mandatory([Counter::Infected]), clock()).unwrap_err();
        assert_eq!(err.field, "infected");
        assert!(matches!(err.reason, NormalizationReason::NotAnInteger(_)));
    }

    #[test]
    fn test_mandatory_missing_fails() {
        let raw = RawFields::new().with(keys::DECEASED, 4i64);
        let err = normalize(raw, &meta().with_mandatory([Counter::Infected]), clock()).unwrap_err();
        assert_eq!(err, NormalizationError::new("infected", NormalizationReason::Missing));
    }

    #[test]
    fn test_mandatory_missing_but_derivable() {
        let mut raw = RawFields::new();
        raw.push_region(region("A", 3, Some(0)));
        let snap = normalize(raw, &meta().with_mandatory([Counter::Infected]), clock()).unwrap();
        assert_eq!(snap.content.infected, Some(3));
    }

    #[test]
    fn test_optional_garbage_is_absent() {
        let raw = RawFields::new()
            .with(keys::INFECTED, 10i64)
            .with(keys::TESTED, "")
            .with(keys::RECOVERED, "unknown")
            .with(keys::REPRODUCTION_NUMBER, "-");
        let snap = normalize(raw, &meta().with_mandatory([Counter::Infected]), clock()).unwrap();
        assert_eq!(snap.content.tested, None);
        assert_eq!(snap.content.recovered, None);
        assert_eq!(snap.content.reproduction_number, None);
    }

    #[test]
    fn test_zero_is_not_absent() {
        let raw = RawFields::new().with(keys::INFECTED, 10i64).with(keys::DECEASED, "0");
        let snap = normalize(raw, &meta(), clock()).unwrap();
        assert_eq!(snap.content.deceased, Some(0));
    }

    #[test]
    fn test_duplicate_region_fails() {
        let mut raw = RawFields::new().with(keys::INFECTED, 2i64);
        raw.push_region(region("A", 1, None));
        raw.push_region(region("A", 1, None));
        let err = normalize(raw, &meta(), clock()).unwrap_err();
        assert_eq!(err.reason, NormalizationReason::DuplicateRegion("A".into()));
    }

    #[test]
    fn test_region_order_preserved_and_blank_rows_dropped() {
        let mut raw = RawFields::new();
        raw.push_region(region("Zachodniopomorskie", 3, Some(0)));
        raw.push_region(region("  ", 9, Some(9)));
        raw.push_region(region("Dolnośląskie", 4, Some(1)));

        let snap = normalize(raw, &meta(), clock()).unwrap();
        let names: Vec<&str> = snap
            .content
            .region_breakdown
            .iter()
            .map(|r| r.region.as_str())
            .collect();
        assert_eq!(names, vec!["Zachodniopomorskie", "Dolnośląskie"]);
        assert_eq!(snap.content.infected, Some(7));
    }

    fn unreadable(name: &str) -> RawRow {
        row([(keys::REGION, RawValue::from(name)), (keys::INFECTED_COUNT, "n/a".into())])
    }

    #[test]
    fn test_bad_region_row_when_infected_must_be_derived() {
        let mut raw = RawFields::new();
        raw.push_region(region("A", 60, Some(1)));
        raw.push_region(unreadable("B"));
        let err = normalize(raw, &meta().with_mandatory([Counter::Infected]), clock()).unwrap_err();
        assert_eq!(err.field, "regionBreakdown.B.infectedCount");
        assert_eq!(err.reason, NormalizationReason::NotAnInteger("n/a".into()));
    }

    #[test]
    fn test_bad_region_row_with_reported_mandatory_total() {
        let mut raw = RawFields::new()
            .with(keys::INFECTED, 100i64)
            .with(keys::DECEASED, 3i64);
        raw.push_region(region("A", 60, Some(1)));
        raw.push_region(unreadable("B"));
        let mandatory = meta().with_mandatory([Counter::Infected, Counter::Deceased]);

        let snap = normalize(raw, &mandatory, clock()).unwrap();
        assert_eq!(snap.content.infected, Some(100));
        assert_eq!(snap.content.deceased, Some(3));
        assert_eq!(snap.content.region_breakdown.len(), 1);
        assert_eq!(snap.content.region_breakdown[0].region, "A");
        assert!(snap.content.derived_totals.is_empty());
    }

    #[test]
    fn test_dropped_region_leaves_derived_infected_absent() {
        let mut raw = RawFields::new();
        raw.push_region(region("A", 60, Some(2)));
        raw.push_region(unreadable("B"));

        let snap = normalize(raw, &meta(), clock()).unwrap();
        assert_eq!(snap.content.infected, None);
        assert_eq!(snap.content.deceased, None);
        assert!(snap.content.derived_totals.is_empty());
        assert_eq!(snap.content.region_breakdown.len(), 1);
    }
}
