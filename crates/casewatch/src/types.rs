//! Core data types for case snapshots, verdicts, and breaker decisions.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A top-level counter of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Counter {
    Infected,
    Deceased,
    Recovered,
    Tested,
    Active,
}

impl Counter {
    /// Every top-level counter, in schema order.
    pub const TOP_LEVEL: [Counter; 5] = [
        Counter::Infected,
        Counter::Deceased,
        Counter::Recovered,
        Counter::Tested,
        Counter::Active,
    ];

    /// Counters expected to be non-decreasing over time.
    pub const CUMULATIVE: [Counter; 4] = [
        Counter::Infected,
        Counter::Deceased,
        Counter::Tested,
        Counter::Recovered,
    ];

    /// Canonical raw field key for this counter.
    pub fn key(self) -> &'static str {
        match self {
            Counter::Infected => "infected",
            Counter::Deceased => "deceased",
            Counter::Recovered => "recovered",
            Counter::Tested => "tested",
            Counter::Active => "active",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One row of a regional breakdown, in source table order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRecord {
    pub region: String,
    pub infected_count: u64,
    /// Absent when the source does not report deaths per region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deceased_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tested_count: Option<u64>,
}

impl RegionRecord {
    pub fn new(region: impl Into<String>, infected_count: u64) -> Self {
        Self {
            region: region.into(),
            infected_count,
            deceased_count: None,
            recovered_count: None,
            tested_count: None,
        }
    }

    pub fn with_deceased(mut self, deceased: u64) -> Self {
        self.deceased_count = Some(deceased);
        self
    }
}

/// Provenance links published alongside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLinks {
    /// Where consumers read the latest record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    /// Where consumers read the change history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

/// Everything a snapshot carries except its observation timestamp.
///
/// Two snapshots are "the same data" exactly when their contents are equal;
/// this is also the shape of a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotContent {
    pub country: String,
    pub infected: Option<u64>,
    pub deceased: Option<u64>,
    pub recovered: Option<u64>,
    pub tested: Option<u64>,
    pub active: Option<u64>,
    pub daily_infected: Option<i64>,
    pub daily_deceased: Option<i64>,
    pub daily_tested: Option<i64>,
    pub reproduction_number: Option<f64>,
    #[serde(default)]
    pub region_breakdown: Vec<RegionRecord>,
    /// Top-level counters summed from the region breakdown instead of reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_totals: Vec<Counter>,
    /// Timestamp published by the source itself, truncated to minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_updated_at: Option<DateTime<Utc>>,
    pub source_url: String,
    #[serde(default)]
    pub links: ReferenceLinks,
}

/// A history entry is a snapshot without its observation timestamp.
pub type HistoryEntry = SnapshotContent;

impl SnapshotContent {
    /// Empty content for a country: nothing reported yet.
    pub fn new(country: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            infected: None,
            deceased: None,
            recovered: None,
            tested: None,
            active: None,
            daily_infected: None,
            daily_deceased: None,
            daily_tested: None,
            reproduction_number: None,
            region_breakdown: Vec::new(),
            derived_totals: Vec::new(),
            source_updated_at: None,
            source_url: source_url.into(),
            links: ReferenceLinks::default(),
        }
    }

    pub fn counter(&self, counter: Counter) -> Option<u64> {
        match counter {
            Counter::Infected => self.infected,
            Counter::Deceased => self.deceased,
            Counter::Recovered => self.recovered,
            Counter::Tested => self.tested,
            Counter::Active => self.active,
        }
    }

    pub fn set_counter(&mut self, counter: Counter, value: Option<u64>) {
        let slot = match counter {
            Counter::Infected => &mut self.infected,
            Counter::Deceased => &mut self.deceased,
            Counter::Recovered => &mut self.recovered,
            Counter::Tested => &mut self.tested,
            Counter::Active => &mut self.active,
        };
        *slot = value;
    }

    /// The daily delta that accompanies a cumulative counter, if any.
    pub fn daily_for(&self, counter: Counter) -> Option<i64> {
        match counter {
            Counter::Infected => self.daily_infected,
            Counter::Deceased => self.daily_deceased,
            Counter::Tested => self.daily_tested,
            Counter::Recovered | Counter::Active => None,
        }
    }

    /// Top-level counters that carry a value.
    pub fn populated_counters(&self) -> Vec<Counter> {
        Counter::TOP_LEVEL
            .into_iter()
            .filter(|c| self.counter(*c).is_some())
            .collect()
    }

    /// Whether a counter was summed from regions rather than reported.
    pub fn is_derived(&self, counter: Counter) -> bool {
        self.derived_totals.contains(&counter)
    }
}

/// One normalized observation of a country's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(flatten)]
    pub content: SnapshotContent,
    /// Assigned by the pipeline's run clock, whole minutes only.
    pub observed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(content: SnapshotContent, observed_at: DateTime<Utc>) -> Self {
        Self {
            content,
            observed_at: truncate_to_minute(observed_at),
        }
    }

    pub fn country(&self) -> &str {
        &self.content.country
    }

    /// Structural equality ignoring `observed_at`.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.content == other.content
    }

    pub fn history_entry(&self) -> HistoryEntry {
        self.content.clone()
    }
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Why the guard flagged or rejected a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyReason {
    /// A cumulative counter went down by more than its tolerance.
    CounterDecreased {
        counter: Counter,
        previous: u64,
        candidate: u64,
        tolerance: u64,
    },
    /// Counters reported last time are missing now.
    CountersMissing { missing: Vec<Counter> },
    /// A single-step increase above the configured limit.
    ImplausibleJump {
        counter: Counter,
        previous: u64,
        candidate: u64,
        limit: u64,
    },
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::CounterDecreased {
                counter,
                previous,
                candidate,
                tolerance,
            } => write!(
                f,
                "{counter} decreased from {previous} to {candidate} (tolerance {tolerance})"
            ),
            AnomalyReason::CountersMissing { missing } => {
                let names: Vec<&str> = missing.iter().map(|c| c.key()).collect();
                write!(f, "previously reported counters missing: {}", names.join(", "))
            }
            AnomalyReason::ImplausibleJump {
                counter,
                previous,
                candidate,
                limit,
            } => write!(
                f,
                "{counter} jumped from {previous} to {candidate} (step limit {limit})"
            ),
        }
    }
}

/// The guard's three-way classification of a candidate snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    /// Accepted and persisted, but flagged.
    Suspect(AnomalyReason),
    /// Never persisted; counts toward the failure streak.
    Reject(AnomalyReason),
}

impl Verdict {
    pub fn is_reject(&self) -> bool {
        matches!(self, Verdict::Reject(_))
    }

    /// Accept and Suspect both lead to persistence.
    pub fn is_persistable(&self) -> bool {
        !self.is_reject()
    }

    pub fn reason(&self) -> Option<&AnomalyReason> {
        match self {
            Verdict::Accept => None,
            Verdict::Suspect(r) | Verdict::Reject(r) => Some(r),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => f.write_str("accept"),
            Verdict::Suspect(r) => write!(f, "suspect: {r}"),
            Verdict::Reject(r) => write!(f, "reject: {r}"),
        }
    }
}

/// Whether consecutive rejections warrant external alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "count", rename_all = "snake_case")]
pub enum BreakerDecision {
    Continue,
    TripAlert(u32),
}

impl BreakerDecision {
    pub fn is_trip(&self) -> bool {
        matches!(self, BreakerDecision::TripAlert(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn content(infected: Option<u64>) -> SnapshotContent {
        let mut c = SnapshotContent::new("Germany", "https://example.org/de");
        c.infected = infected;
        c
    }

    #[test]
    fn test_truncate_to_minute() {
        let ts = Utc.with_ymd_and_hms(2020, 4, 1, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(789);
        let truncated = truncate_to_minute(ts);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2020, 4, 1, 12, 34, 0).unwrap());
    }

    #[test]
    fn test_same_content_ignores_observed_at() {
        let a = Snapshot::new(content(Some(10)), Utc.with_ymd_and_hms(2020, 4, 1, 8, 0, 0).unwrap());
        let b = Snapshot::new(content(Some(10)), Utc.with_ymd_and_hms(2020, 4, 2, 9, 30, 0).unwrap());
        assert!(a.same_content(&b));
        assert_ne!(a, b);

        let c = Snapshot::new(content(Some(11)), a.observed_at);
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_populated_counters() {
        let mut c = content(Some(5));
        c.tested = Some(0);
        assert_eq!(c.populated_counters(), vec![Counter::Infected, Counter::Tested]);
    }

    #[test]
    fn test_snapshot_serializes_flat_camel_case() {
        let mut c = content(Some(42));
        c.daily_infected = Some(-3);
        c.region_breakdown.push(RegionRecord::new("Bayern", 42).with_deceased(1));
        let snap = Snapshot::new(c, Utc.with_ymd_and_hms(2020, 4, 1, 8, 0, 0).unwrap());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["country"], "Germany");
        assert_eq!(json["infected"], 42);
        assert_eq!(json["dailyInfected"], -3);
        assert_eq!(json["regionBreakdown"][0]["infectedCount"], 42);
        assert_eq!(json["regionBreakdown"][0]["deceasedCount"], 1);
        assert!(json["regionBreakdown"][0].get("testedCount").is_none());
        assert!(json.get("content").is_none());

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_verdict_serialization() {
        let v = Verdict::Reject(AnomalyReason::CounterDecreased {
            counter: Counter::Infected,
            previous: 100,
            candidate: 95,
            tolerance: 0,
        });
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "reject");
        assert_eq!(json["reason"]["type"], "counter_decreased");
        assert_eq!(json["reason"]["counter"], "infected");

        let accept = serde_json::to_value(Verdict::Accept).unwrap();
        assert_eq!(accept["kind"], "accept");
    }

    #[test]
    fn test_reason_display() {
        let r = AnomalyReason::CountersMissing {
            missing: vec![Counter::Deceased, Counter::Tested],
        };
        assert_eq!(r.to_string(), "previously reported counters missing: deceased, tested");
    }
}
