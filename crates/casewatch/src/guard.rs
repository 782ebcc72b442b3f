//! Anomaly guard: decides whether a freshly normalized snapshot is a
//! plausible update of the stored one or a corrupted scrape.
//!
//! Rules run in order and the first one that fires wins:
//! 1. counters reported last time but missing now → `Reject`
//! 2. a cumulative counter decreasing beyond its tolerance → `Reject`
//! 3. an implausibly large single-step increase → `Suspect`

use serde::{Deserialize, Serialize};

use crate::types::{AnomalyReason, Counter, Snapshot, Verdict};

/// How far each cumulative counter may go down before the candidate is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerances {
    pub infected: u64,
    /// Absorbs same-day death-count corrections.
    pub deceased: u64,
    pub recovered: u64,
    pub tested: u64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            infected: 0,
            deceased: 10,
            recovered: 0,
            tested: 0,
        }
    }
}

impl Tolerances {
    pub fn for_counter(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Infected => self.infected,
            Counter::Deceased => self.deceased,
            Counter::Recovered => self.recovered,
            Counter::Tested => self.tested,
            Counter::Active => u64::MAX,
        }
    }
}

/// Bound on a single-step increase of infected or deceased.
///
/// The allowed step is the largest of `ratio × previous value`, `floor`, and
/// `trend_multiplier × previous daily figure` (when the previous snapshot
/// carries one).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JumpLimit {
    pub ratio: f64,
    pub floor: u64,
    pub trend_multiplier: f64,
}

impl JumpLimit {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            floor: 1_000,
            trend_multiplier: 10.0,
        }
    }

    fn allowed_step(&self, previous: u64, previous_daily: Option<i64>) -> u64 {
        let relative = (previous as f64 * self.ratio).max(0.0) as u64;
        let trend = previous_daily
            .filter(|d| *d > 0)
            .map(|d| (d as f64 * self.trend_multiplier).max(0.0) as u64)
            .unwrap_or(0);
        relative.max(self.floor).max(trend)
    }
}

/// Guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// When false every candidate is accepted.
    pub enabled: bool,
    pub tolerances: Tolerances,
    /// `None` disables the Suspect classification.
    pub jump_limit: Option<JumpLimit>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerances: Tolerances::default(),
            jump_limit: None,
        }
    }
}

/// Classifies candidates against the last accepted snapshot.
#[derive(Debug, Clone, Default)]
pub struct AnomalyGuard {
    config: GuardConfig,
}

impl AnomalyGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Evaluate `candidate` against the stored `previous` snapshot.
    pub fn evaluate(&self, candidate: &Snapshot, previous: Option<&Snapshot>) -> Verdict {
        self.evaluate_with(candidate, previous, None)
    }

    /// Like [`evaluate`](Self::evaluate), with per-country tolerances
    /// replacing the configured ones when given.
    pub fn evaluate_with(
        &self,
        candidate: &Snapshot,
        previous: Option<&Snapshot>,
        tolerances: Option<&Tolerances>,
    ) -> Verdict {
        let previous = match previous {
            Some(p) if self.config.enabled => p,
            _ => return Verdict::Accept,
        };

        if let Some(reason) = missing_counters(candidate, previous) {
            return Verdict::Reject(reason);
        }
        let tolerances = tolerances.unwrap_or(&self.config.tolerances);
        if let Some(reason) = decreased_counter(candidate, previous, tolerances) {
            return Verdict::Reject(reason);
        }
        if let Some(reason) = self.implausible_jump(candidate, previous) {
            return Verdict::Suspect(reason);
        }
        Verdict::Accept
    }

    fn implausible_jump(&self, candidate: &Snapshot, previous: &Snapshot) -> Option<AnomalyReason> {
        let limit = self.config.jump_limit?;
        [Counter::Infected, Counter::Deceased]
            .into_iter()
            .find_map(|counter| {
                let before = previous.content.counter(counter)?;
                let now = candidate.content.counter(counter)?;
                let allowed = limit.allowed_step(before, previous.content.daily_for(counter));
                (now.saturating_sub(before) > allowed).then_some(AnomalyReason::ImplausibleJump {
                    counter,
                    previous: before,
                    candidate: now,
                    limit: allowed,
                })
            })
    }
}

fn decreased_counter(
    candidate: &Snapshot,
    previous: &Snapshot,
    tolerances: &Tolerances,
) -> Option<AnomalyReason> {
    Counter::CUMULATIVE.into_iter().find_map(|counter| {
        let before = previous.content.counter(counter)?;
        let now = candidate.content.counter(counter)?;
        let tolerance = tolerances.for_counter(counter);
        (before.saturating_sub(now) > tolerance).then_some(AnomalyReason::CounterDecreased {
            counter,
            previous: before,
            candidate: now,
            tolerance,
        })
    })
}

fn missing_counters(candidate: &Snapshot, previous: &Snapshot) -> Option<AnomalyReason> {
    let before = previous.content.populated_counters();
    let now = candidate.content.populated_counters();
    if now.len() >= before.len() {
        return None;
    }
    let missing: Vec<Counter> = before.into_iter().filter(|c| !now.contains(c)).collect();
    (!missing.is_empty()).then_some(AnomalyReason::CountersMissing { missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotContent;
    use chrono::{TimeZone, Utc};

    fn snap(infected: Option<u64>, deceased: Option<u64>) -> Snapshot {
        let mut c = SnapshotContent::new("Netherlands", "https://example.org/nl");
        c.infected = infected;
        c.deceased = deceased;
        Snapshot::new(c, Utc.with_ymd_and_hms(2020, 4, 3, 7, 0, 0).unwrap())
    }

    #[test]
    fn test_first_observation_always_accepted() {
        let guard = AnomalyGuard::default();
        assert_eq!(guard.evaluate(&snap(Some(0), None), None), Verdict::Accept);
        assert_eq!(guard.evaluate(&snap(None, None), None), Verdict::Accept);
    }

    #[test]
    fn test_infected_decrease_rejected() {
        let guard = AnomalyGuard::default();
        let verdict = guard.evaluate(&snap(Some(95), Some(10)), Some(&snap(Some(100), Some(10))));
        assert_eq!(
            verdict,
            Verdict::Reject(AnomalyReason::CounterDecreased {
                counter: Counter::Infected,
                previous: 100,
                candidate: 95,
                tolerance: 0,
            })
        );
    }

    #[test]
    fn test_monotonicity_for_every_drop() {
        let guard = AnomalyGuard::default();
        let previous = snap(Some(1_000), Some(10));
        for y in [0, 1, 500, 998, 999] {
            let verdict = guard.evaluate(&snap(Some(y), Some(10)), Some(&previous));
            assert!(verdict.is_reject(), "infected {y} should be rejected");
        }
        let same = guard.evaluate(&snap(Some(1_000), Some(10)), Some(&previous));
        assert_eq!(same, Verdict::Accept);
    }

    #[test]
    fn test_deceased_within_tolerance_accepted() {
        let guard = AnomalyGuard::default();
        let previous = snap(Some(100), Some(50));
        assert_eq!(guard.evaluate(&snap(Some(100), Some(40)), Some(&previous)), Verdict::Accept);
        assert!(guard
            .evaluate(&snap(Some(100), Some(39)), Some(&previous))
            .is_reject());
    }

    #[test]
    fn test_country_tolerances_replace_configured_ones() {
        let guard = AnomalyGuard::default();
        let previous = snap(Some(100), Some(10));
        let lenient = Tolerances {
            infected: 10,
            ..Tolerances::default()
        };
        let candidate = snap(Some(95), Some(10));
        assert_eq!(
            guard.evaluate_with(&candidate, Some(&previous), Some(&lenient)),
            Verdict::Accept
        );
        assert!(guard
            .evaluate_with(&snap(Some(89), Some(10)), Some(&previous), Some(&lenient))
            .is_reject());
        assert!(guard
            .evaluate_with(&candidate, Some(&previous), None)
            .is_reject());
    }

    #[test]
    fn test_increase_accepted() {
        let guard = AnomalyGuard::default();
        let verdict = guard.evaluate(&snap(Some(120), Some(12)), Some(&snap(Some(100), Some(10))));
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn test_missing_counter_rejected() {
        let guard = AnomalyGuard::default();
        let verdict = guard.evaluate(&snap(Some(120), None), Some(&snap(Some(100), Some(10))));
        assert_eq!(
            verdict,
            Verdict::Reject(AnomalyReason::CountersMissing {
                missing: vec![Counter::Deceased]
            })
        );
    }

    #[test]
    fn test_counter_absent_before_and_now_is_fine() {
        let guard = AnomalyGuard::default();
        let verdict = guard.evaluate(&snap(Some(120), None), Some(&snap(Some(100), None)));
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn test_swapped_counter_is_not_missing_rule() {
        // Same number of populated counters: the missing-field rule does not fire.
        let guard = AnomalyGuard::default();
        let mut candidate = snap(Some(120), None);
        candidate.content.tested = Some(5);
        let verdict = guard.evaluate(&candidate, Some(&snap(Some(100), Some(10))));
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn test_disabled_guard_accepts_everything() {
        let guard = AnomalyGuard::new(GuardConfig {
            enabled: false,
            ..GuardConfig::default()
        });
        let verdict = guard.evaluate(&snap(Some(1), None), Some(&snap(Some(100), Some(10))));
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn test_jump_flagged_as_suspect() {
        let guard = AnomalyGuard::new(GuardConfig {
            jump_limit: Some(JumpLimit::new(0.5)),
            ..GuardConfig::default()
        });
        let previous = snap(Some(10_000), Some(100));

        let small = guard.evaluate(&snap(Some(14_000), Some(100)), Some(&previous));
        assert_eq!(small, Verdict::Accept);

        let big = guard.evaluate(&snap(Some(30_000), Some(100)), Some(&previous));
        assert_eq!(
            big,
            Verdict::Suspect(AnomalyReason::ImplausibleJump {
                counter: Counter::Infected,
                previous: 10_000,
                candidate: 30_000,
                limit: 5_000,
            })
        );
        assert!(big.is_persistable());
    }

    #[test]
    fn test_jump_limit_follows_daily_trend() {
        let guard = AnomalyGuard::new(GuardConfig {
            jump_limit: Some(JumpLimit::new(0.1)),
            ..GuardConfig::default()
        });
        let mut previous = snap(Some(10_000), Some(100));
        previous.content.daily_infected = Some(900);

        // 10% of 10k is 1k, but the daily trend allows 9k.
        let verdict = guard.evaluate(&snap(Some(18_000), Some(100)), Some(&previous));
        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn test_reject_takes_precedence_over_suspect() {
        let guard = AnomalyGuard::new(GuardConfig {
            jump_limit: Some(JumpLimit::new(0.01)),
            ..GuardConfig::default()
        });
        let verdict = guard.evaluate(&snap(Some(90_000), Some(5)), Some(&snap(Some(10_000), Some(100))));
        assert!(verdict.is_reject());
    }
}
