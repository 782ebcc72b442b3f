//! `casewatch run`: one pipeline run per country, concurrently.

use crate::cli::output;
use crate::config::RuntimeConfig;
use crate::feed::RunFeed;
use crate::fetch::HttpClient;
use crate::sources::catalog;
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use casewatch::{CountryPlan, Orchestrator, RunResult, SnapshotStore, Verdict};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit status when every run finished with Accept or Suspect.
pub const EXIT_OK: i32 = 0;
/// At least one run ended in `Failed`.
pub const EXIT_FAILED: i32 = 1;
/// At least one candidate was rejected.
pub const EXIT_REJECTED: i32 = 2;
/// At least one failure streak reached the alert threshold.
pub const EXIT_TRIPPED: i32 = 3;

/// Run the pipeline for `countries` (or the whole catalog when `all`).
///
/// Returns the process exit code.
pub async fn run(countries: &[String], all: bool, config: &RuntimeConfig) -> Result<i32> {
    let countries: Vec<String> = if all {
        catalog::COUNTRIES.iter().map(|c| c.to_string()).collect()
    } else {
        countries.to_vec()
    };
    if countries.is_empty() {
        anyhow::bail!("no countries given (pass names or --all)");
    }

    let client = HttpClient::new(config.fetch_timeout_ms);
    let plans = catalog::plans(&countries, &client)?;

    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteStore::open(&config.store_path())?);
    let orchestrator = Orchestrator::new(store, config.pipeline());
    let mut feed = RunFeed::open(&config.feed_path())?;

    info!(
        "running {} countr{} (failed limit {})",
        plans.len(),
        if plans.len() == 1 { "y" } else { "ies" },
        config.failed_limit
    );
    let results = execute(&orchestrator, &plans, &mut feed).await?;

    if output::is_json() {
        output::print_json(&serde_json::json!({ "runs": results }));
    } else if !output::is_quiet() {
        for result in &results {
            print_summary(result);
        }
    }

    Ok(exit_code(&results))
}

/// Run every plan concurrently and append each result to the feed, in plan order.
pub async fn execute(
    orchestrator: &Orchestrator,
    plans: &[CountryPlan],
    feed: &mut RunFeed,
) -> Result<Vec<RunResult>> {
    let results = futures::future::join_all(plans.iter().map(|p| orchestrator.run(p))).await;
    for result in &results {
        feed.append(result)
            .with_context(|| format!("failed to record run for {}", result.country))?;
    }
    Ok(results)
}

/// The most severe outcome across all runs decides the exit code.
pub fn exit_code(results: &[RunResult]) -> i32 {
    if results.iter().any(RunResult::tripped) {
        EXIT_TRIPPED
    } else if results.iter().any(RunResult::is_rejected) {
        EXIT_REJECTED
    } else if results.iter().any(|r| !r.is_done()) {
        EXIT_FAILED
    } else {
        EXIT_OK
    }
}

/// Short verdict text for the summary line.
fn verdict_label(verdict: Option<&Verdict>) -> String {
    let Some(verdict) = verdict else {
        return "-".to_string();
    };
    match verdict.reason() {
        None => "accept".to_string(),
        Some(reason) if verdict.is_reject() => format!("reject ({reason})"),
        Some(reason) => format!("suspect ({reason})"),
    }
}

fn print_summary(result: &RunResult) {
    let verdict = verdict_label(result.verdict.as_ref());

    match result.error() {
        None => {
            let (infected, deceased) = result
                .snapshot
                .as_ref()
                .map(|s| (s.content.infected, s.content.deceased))
                .unwrap_or_default();
            println!(
                "  {:<12} done    infected {:>10}  deceased {:>8}  {}{}",
                result.country,
                output::count(infected),
                output::count(deceased),
                verdict,
                if result.history_appended { "  (new history entry)" } else { "" },
            );
        }
        Some(error) => {
            println!(
                "  {:<12} failed  at {}: {}",
                result.country,
                result.stage(),
                error
            );
        }
    }

    if result.is_rejected() {
        warn!(country = %result.country, "candidate rejected: {verdict}");
    }
    if let Some(count) = result.failure_count.filter(|_| result.tripped()) {
        eprintln!(
            "  ALERT: {} has failed validation {count} times in a row",
            result.country
        );
    }
    if output::is_verbose() {
        for source in &result.sources {
            println!(
                "      {:<16} {}",
                source.source_id,
                serde_json::to_string(&source.status).unwrap_or_default()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casewatch::{AnomalyReason, BreakerDecision, Counter, RunError, RunOutcome, RunStage};
    use chrono::Utc;

    fn done(verdict: Verdict) -> RunResult {
        let breaker_decision = Some(BreakerDecision::Continue);
        RunResult {
            run_id: uuid::Uuid::new_v4(),
            country: "Poland".into(),
            timestamp: Utc::now(),
            outcome: RunOutcome::Done,
            verdict: Some(verdict),
            breaker_decision,
            snapshot: None,
            persisted: true,
            history_appended: false,
            failure_count: Some(0),
            sources: Vec::new(),
        }
    }

    fn decreased() -> AnomalyReason {
        AnomalyReason::CounterDecreased {
            counter: Counter::Infected,
            previous: 10,
            candidate: 5,
            tolerance: 0,
        }
    }

    #[test]
    fn test_all_accepted_is_ok() {
        let results = vec![done(Verdict::Accept), done(Verdict::Suspect(decreased()))];
        assert_eq!(exit_code(&results), EXIT_OK);
        assert_eq!(exit_code(&[]), EXIT_OK);
    }

    #[test]
    fn test_verdict_label() {
        assert_eq!(verdict_label(None), "-");
        assert_eq!(verdict_label(Some(&Verdict::Accept)), "accept");
        assert_eq!(
            verdict_label(Some(&Verdict::Reject(decreased()))),
            "reject (infected decreased from 10 to 5 (tolerance 0))"
        );
    }

    #[test]
    fn test_failed_run() {
        let mut failed = done(Verdict::Accept);
        failed.verdict = None;
        failed.outcome = RunOutcome::Failed {
            stage: RunStage::Fetching,
            error: RunError::NoData,
        };
        assert_eq!(exit_code(&[done(Verdict::Accept), failed]), EXIT_FAILED);
    }

    #[test]
    fn test_severity_order() {
        let mut failed = done(Verdict::Accept);
        failed.outcome = RunOutcome::Failed {
            stage: RunStage::Fetching,
            error: RunError::NoData,
        };
        let rejected = done(Verdict::Reject(decreased()));
        assert_eq!(
            exit_code(&[failed.clone(), rejected.clone()]),
            EXIT_REJECTED
        );

        let mut tripped = rejected;
        tripped.breaker_decision = Some(BreakerDecision::TripAlert(5));
        assert_eq!(exit_code(&[failed, tripped]), EXIT_TRIPPED);
    }
}
