//! Failure-streak circuit breaker.
//!
//! Counts consecutive rejected candidates per country. The count is seeded
//! from the durable store at the start of every run and written back at the
//! end, so the streak survives across independently scheduled runs.

use std::collections::HashMap;

use crate::types::{BreakerDecision, Verdict};

/// Consecutive rejections before operators are alerted.
pub const DEFAULT_FAILED_LIMIT: u32 = 5;

/// Per-country consecutive-reject counter.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    threshold: u32,
    counts: HashMap<String, u32>,
}

impl FailureTracker {
    /// Create a tracker that trips on the `threshold`-th consecutive reject.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: HashMap::new(),
        }
    }

    /// Load the durable count for a country.
    pub fn seed(&mut self, country: &str, count: u32) {
        self.counts.insert(country.to_string(), count);
    }

    /// Current streak for a country (0 when never seen).
    pub fn count(&self, country: &str) -> u32 {
        self.counts.get(country).copied().unwrap_or(0)
    }

    /// Fold a verdict into the streak.
    pub fn record(&mut self, country: &str, verdict: &Verdict) -> BreakerDecision {
        let count = self.counts.entry(country.to_string()).or_insert(0);
        match verdict {
            Verdict::Accept | Verdict::Suspect(_) => {
                *count = 0;
                BreakerDecision::Continue
            }
            Verdict::Reject(_) => {
                *count = count.saturating_add(1);
                if *count >= self.threshold {
                    BreakerDecision::TripAlert(*count)
                } else {
                    BreakerDecision::Continue
                }
            }
        }
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILED_LIMIT)
    }
}
