//! Pipeline orchestrator: fetch → normalize → guard → persist.
//!
//! One [`Orchestrator::run`] call is one run for one country. Source fetches
//! are the only suspension points and run concurrently; everything after the
//! join is synchronous. Persistence is a single compare-and-set commit, so a
//! run either writes its whole result or nothing.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::breaker::{FailureTracker, DEFAULT_FAILED_LIMIT};
use crate::error::{FetchError, RunError};
use crate::extractor::{Extractor, Requirement, SourceConfig};
use crate::guard::{AnomalyGuard, GuardConfig, Tolerances};
use crate::normalize::{normalize, SourceMeta};
use crate::raw::RawFields;
use crate::store::{Commit, Expected, SnapshotStore};
use crate::types::{BreakerDecision, ReferenceLinks, Snapshot, Verdict};

/// A source paired with the extractor that knows how to read it.
#[derive(Clone)]
pub struct SourceBinding {
    pub config: SourceConfig,
    pub extractor: Arc<dyn Extractor>,
}

impl SourceBinding {
    pub fn new(config: SourceConfig, extractor: Arc<dyn Extractor>) -> Self {
        Self { config, extractor }
    }
}

/// Everything needed to assemble one country's snapshot.
#[derive(Clone)]
pub struct CountryPlan {
    pub country: String,
    /// Human-facing page the numbers come from.
    pub source_url: String,
    pub links: ReferenceLinks,
    /// Merged in this order; earlier sources win on conflicting fields.
    pub sources: Vec<SourceBinding>,
    /// Replaces the guard's configured tolerances for this country.
    pub tolerances: Option<Tolerances>,
}

/// Knobs the orchestrator consumes.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub guard: GuardConfig,
    /// Consecutive rejects before the breaker trips.
    pub failed_limit: u32,
    /// Whole-run timeout; `None` waits for the extractors' own timeouts.
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            failed_limit: DEFAULT_FAILED_LIMIT,
            run_timeout: None,
        }
    }
}

/// Stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Fetching,
    Normalizing,
    Guarding,
    Persisting,
    Done,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Fetching => "fetching",
            RunStage::Normalizing => "normalizing",
            RunStage::Guarding => "guarding",
            RunStage::Persisting => "persisting",
            RunStage::Done => "done",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Failed { stage: RunStage, error: RunError },
}

/// What happened to one source during the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Fetched { fields: usize, regions: usize },
    Failed { error: FetchError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source_id: String,
    pub requirement: Requirement,
    #[serde(flatten)]
    pub status: SourceStatus,
}

/// Structured result of one run, suitable for a persisted-items feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub country: String,
    /// The run clock.
    pub timestamp: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub verdict: Option<Verdict>,
    pub breaker_decision: Option<BreakerDecision>,
    /// The candidate snapshot, present once normalization succeeded.
    pub snapshot: Option<Snapshot>,
    /// Whether the latest slot was written.
    pub persisted: bool,
    pub history_appended: bool,
    /// Failure streak after this run's verdict.
    pub failure_count: Option<u32>,
    pub sources: Vec<SourceReport>,
}

impl RunResult {
    /// The stage the run ended in.
    pub fn stage(&self) -> RunStage {
        match &self.outcome {
            RunOutcome::Done => RunStage::Done,
            RunOutcome::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome == RunOutcome::Done
    }

    pub fn error(&self) -> Option<&RunError> {
        match &self.outcome {
            RunOutcome::Done => None,
            RunOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.verdict.as_ref().is_some_and(Verdict::is_reject)
    }

    pub fn tripped(&self) -> bool {
        self.breaker_decision.is_some_and(|d| d.is_trip())
    }
}

/// Mutable state threaded through a single run.
struct RunContext {
    run_id: Uuid,
    country: String,
    clock: DateTime<Utc>,
    stage: RunStage,
    failure: Option<(RunStage, RunError)>,
    verdict: Option<Verdict>,
    breaker: Option<BreakerDecision>,
    snapshot: Option<Snapshot>,
    persisted: bool,
    history_appended: bool,
    failure_count: Option<u32>,
    sources: Vec<SourceReport>,
}

impl RunContext {
    fn new(country: &str, clock: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            country: country.to_string(),
            clock,
            stage: RunStage::Fetching,
            failure: None,
            verdict: None,
            breaker: None,
            snapshot: None,
            persisted: false,
            history_appended: false,
            failure_count: None,
            sources: Vec::new(),
        }
    }

    fn enter(&mut self, stage: RunStage) {
        tracing::debug!("{}: {} -> {}", self.country, self.stage, stage);
        self.stage = stage;
    }

    fn fail(&mut self, stage: RunStage, error: RunError) {
        warn!("{}: run failed while {stage}: {error}", self.country);
        if self.failure.is_none() {
            self.failure = Some((stage, error));
        }
    }

    fn finish(self) -> RunResult {
        let outcome = match self.failure {
            Some((stage, error)) => RunOutcome::Failed { stage, error },
            None => RunOutcome::Done,
        };
        RunResult {
            run_id: self.run_id,
            country: self.country,
            timestamp: self.clock,
            outcome,
            verdict: self.verdict,
            breaker_decision: self.breaker,
            snapshot: self.snapshot,
            persisted: self.persisted,
            history_appended: self.history_appended,
            failure_count: self.failure_count,
            sources: self.sources,
        }
    }
}

/// Sequences fetch, normalize, guard and persist against a store.
pub struct Orchestrator {
    store: Arc<dyn SnapshotStore>,
    guard: AnomalyGuard,
    tracker: Mutex<FailureTracker>,
    run_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn SnapshotStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            guard: AnomalyGuard::new(config.guard),
            tracker: Mutex::new(FailureTracker::new(config.failed_limit)),
            run_timeout: config.run_timeout,
        }
    }

    /// Run the pipeline for one country using the wall clock.
    pub async fn run(&self, plan: &CountryPlan) -> RunResult {
        self.run_at(plan, Utc::now()).await
    }

    /// Run the pipeline with an explicit run clock.
    pub async fn run_at(&self, plan: &CountryPlan, clock: DateTime<Utc>) -> RunResult {
        let mut run = RunContext::new(&plan.country, clock);
        info!(
            "{}: run {} started with {} source(s)",
            plan.country,
            run.run_id,
            plan.sources.len()
        );

        match self.run_timeout {
            Some(limit) => {
                let finished = tokio::time::timeout(limit, self.drive(plan, &mut run))
                    .await
                    .is_ok();
                if !finished {
                    // Only fetches suspend, so nothing has been written yet.
                    let stage = run.stage;
                    run.fail(
                        stage,
                        RunError::Timeout {
                            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        },
                    );
                }
            }
            None => self.drive(plan, &mut run).await,
        }

        let result = run.finish();
        info!(
            "{}: run {} ended at {} (persisted={}, history_appended={})",
            result.country,
            result.run_id,
            result.stage(),
            result.persisted,
            result.history_appended
        );
        result
    }

    async fn drive(&self, plan: &CountryPlan, run: &mut RunContext) {
        let Some((merged, meta)) = self.fetch_all(plan, run).await else {
            return;
        };

        run.enter(RunStage::Normalizing);
        let candidate = match normalize(merged, &meta, run.clock) {
            Ok(snapshot) => snapshot,
            Err(e) => return run.fail(RunStage::Normalizing, e.into()),
        };

        run.enter(RunStage::Guarding);
        self.guard_and_persist(plan, candidate, run);
    }

    /// Fetch every source concurrently and merge what arrived, in plan order.
    async fn fetch_all(
        &self,
        plan: &CountryPlan,
        run: &mut RunContext,
    ) -> Option<(RawFields, SourceMeta)> {
        run.enter(RunStage::Fetching);
        let fetches = plan.sources.iter().map(|binding| async move {
            let result = binding.extractor.fetch(&binding.config).await;
            (binding, result)
        });
        let results = join_all(fetches).await;

        let mut merged = RawFields::new();
        let mut meta = SourceMeta::new(plan.country.clone(), plan.source_url.clone());
        meta.links = plan.links.clone();
        let mut delivered = 0usize;
        let mut mandatory_failure = None;

        for (binding, result) in results {
            let config = &binding.config;
            match result {
                Ok(raw) => {
                    run.sources.push(SourceReport {
                        source_id: config.id.clone(),
                        requirement: config.requirement,
                        status: SourceStatus::Fetched {
                            fields: raw.fields.len(),
                            regions: raw.regions.len(),
                        },
                    });
                    meta.mandatory.extend(config.mandatory_fields.iter().copied());
                    merged.merge(raw);
                    delivered += 1;
                }
                Err(error) => {
                    run.sources.push(SourceReport {
                        source_id: config.id.clone(),
                        requirement: config.requirement,
                        status: SourceStatus::Failed {
                            error: error.clone(),
                        },
                    });
                    if config.is_mandatory() {
                        mandatory_failure.get_or_insert(RunError::MandatorySource {
                            source_id: config.id.clone(),
                            error,
                        });
                    } else {
                        warn!(
                            "{}: best-effort source {} unavailable: {error}",
                            plan.country, config.id
                        );
                    }
                }
            }
        }

        if let Some(e) = mandatory_failure {
            run.fail(RunStage::Fetching, e);
            return None;
        }
        if delivered == 0 {
            run.fail(RunStage::Fetching, RunError::NoData);
            return None;
        }
        Some((merged, meta))
    }

    fn guard_and_persist(&self, plan: &CountryPlan, candidate: Snapshot, run: &mut RunContext) {
        let country = plan.country.as_str();
        let previous = match self.store.get_latest(country) {
            Ok(p) => p,
            Err(e) => return run.fail(RunStage::Guarding, e.into()),
        };
        let stored_failures = match self.store.get_failure_count(country) {
            Ok(n) => n,
            Err(e) => return run.fail(RunStage::Guarding, e.into()),
        };

        let verdict = self.guard.evaluate_with(
            &candidate,
            previous.as_ref(),
            plan.tolerances.as_ref(),
        );
        let (decision, failure_count) = {
            let mut tracker = self
                .tracker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tracker.seed(country, stored_failures);
            let decision = tracker.record(country, &verdict);
            (decision, tracker.count(country))
        };

        run.verdict = Some(verdict.clone());
        run.breaker = Some(decision);
        run.failure_count = Some(failure_count);
        run.snapshot = Some(candidate.clone());

        let expected = Expected {
            latest: previous.clone(),
            failure_count: stored_failures,
        };

        if let Verdict::Reject(reason) = &verdict {
            warn!("{country}: candidate rejected ({reason}); latest slot left unchanged");
            if let BreakerDecision::TripAlert(count) = decision {
                error!("{country}: {count} consecutive rejected runs, alerting operators");
            }
            let commit = Commit {
                latest: None,
                history: None,
                failure_count,
            };
            if let Err(e) = self.store.commit(country, &expected, &commit) {
                return run.fail(RunStage::Guarding, e.into());
            }
            run.enter(RunStage::Done);
            return;
        }

        if let Verdict::Suspect(reason) = &verdict {
            warn!("{country}: candidate accepted but suspect: {reason}");
        }

        run.enter(RunStage::Persisting);
        let changed = previous
            .as_ref()
            .map_or(true, |p| !p.same_content(&candidate));
        let history_empty = match self.store.history_len(country) {
            Ok(n) => n == 0,
            Err(e) => return run.fail(RunStage::Persisting, e.into()),
        };
        let history = (changed || history_empty).then(|| candidate.history_entry());
        let appended = history.is_some();

        let commit = Commit {
            latest: Some(candidate),
            history,
            failure_count,
        };
        if let Err(e) = self.store.commit(country, &expected, &commit) {
            return run.fail(RunStage::Persisting, e.into());
        }

        if appended {
            info!("{country}: data changed, history entry appended");
        }
        run.persisted = true;
        run.history_appended = appended;
        run.enter(RunStage::Done);
    }
}
