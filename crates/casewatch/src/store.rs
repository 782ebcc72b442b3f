//! Snapshot store interface and an in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::types::{HistoryEntry, Snapshot};

/// State a run read before deciding what to write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expected {
    pub latest: Option<Snapshot>,
    pub failure_count: u32,
}

/// Everything a run writes, committed as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    /// New latest slot; `None` leaves the slot untouched.
    pub latest: Option<Snapshot>,
    /// History entry to append, if the content changed.
    pub history: Option<HistoryEntry>,
    pub failure_count: u32,
}

/// Durable latest slot, append-only history and failure counter per country.
pub trait SnapshotStore: Send + Sync {
    fn get_latest(&self, country: &str) -> StoreResult<Option<Snapshot>>;

    fn set_latest(&self, country: &str, snapshot: &Snapshot) -> StoreResult<()>;

    fn append_history(&self, country: &str, entry: &HistoryEntry) -> StoreResult<()>;

    /// Full history, oldest first.
    fn history(&self, country: &str) -> StoreResult<Vec<HistoryEntry>>;

    fn history_len(&self, country: &str) -> StoreResult<usize>;

    fn get_failure_count(&self, country: &str) -> StoreResult<u32>;

    fn set_failure_count(&self, country: &str, count: u32) -> StoreResult<()>;

    /// Countries with any stored state.
    fn countries(&self) -> StoreResult<Vec<String>>;

    /// Apply `commit` atomically if the stored state still matches `expected`.
    ///
    /// Returns [`StoreError::Conflict`] without writing anything otherwise.
    fn commit(&self, country: &str, expected: &Expected, commit: &Commit) -> StoreResult<()>;
}

#[derive(Debug, Default, Clone)]
struct CountryState {
    latest: Option<Snapshot>,
    history: Vec<HistoryEntry>,
    failures: u32,
}

/// Process-local store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    countries: Mutex<HashMap<String, CountryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HashMap<String, CountryState>) -> T) -> T {
        let mut guard = self
            .countries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl SnapshotStore for MemoryStore {
    fn get_latest(&self, country: &str) -> StoreResult<Option<Snapshot>> {
        Ok(self.with_state(|m| m.get(country).and_then(|s| s.latest.clone())))
    }

    fn set_latest(&self, country: &str, snapshot: &Snapshot) -> StoreResult<()> {
        self.with_state(|m| {
            m.entry(country.to_string()).or_default().latest = Some(snapshot.clone());
        });
        Ok(())
    }

    fn append_history(&self, country: &str, entry: &HistoryEntry) -> StoreResult<()> {
        self.with_state(|m| {
            m.entry(country.to_string())
                .or_default()
                .history
                .push(entry.clone());
        });
        Ok(())
    }

    fn history(&self, country: &str) -> StoreResult<Vec<HistoryEntry>> {
        Ok(self.with_state(|m| m.get(country).map(|s| s.history.clone()).unwrap_or_default()))
    }

    fn history_len(&self, country: &str) -> StoreResult<usize> {
        Ok(self.with_state(|m| m.get(country).map(|s| s.history.len()).unwrap_or(0)))
    }

    fn get_failure_count(&self, country: &str) -> StoreResult<u32> {
        Ok(self.with_state(|m| m.get(country).map(|s| s.failures).unwrap_or(0)))
    }

    fn set_failure_count(&self, country: &str, count: u32) -> StoreResult<()> {
        self.with_state(|m| m.entry(country.to_string()).or_default().failures = count);
        Ok(())
    }

    fn countries(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.with_state(|m| m.keys().cloned().collect());
        names.sort();
        Ok(names)
    }

    fn commit(&self, country: &str, expected: &Expected, commit: &Commit) -> StoreResult<()> {
        self.with_state(|m| {
            let state = m.entry(country.to_string()).or_default();
            if state.latest != expected.latest || state.failures != expected.failure_count {
                return Err(StoreError::Conflict {
                    country: country.to_string(),
                });
            }
            if let Some(latest) = &commit.latest {
                state.latest = Some(latest.clone());
            }
            if let Some(entry) = &commit.history {
                state.history.push(entry.clone());
            }
            state.failures = commit.failure_count;
            Ok(())
        })
    }
}
