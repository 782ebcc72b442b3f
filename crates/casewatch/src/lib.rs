//! Casewatch: core ingestion pipeline for public health-statistics snapshots.
//!
//! Sources deliver [`RawFields`], the normalizer turns them into a canonical
//! [`Snapshot`], the [`AnomalyGuard`] decides whether the candidate can be
//! trusted, the [`FailureTracker`] counts consecutive rejections, and the
//! [`Orchestrator`] sequences all of it against a [`SnapshotStore`].

pub mod breaker;
pub mod error;
pub mod extractor;
pub mod guard;
pub mod normalize;
pub mod pipeline;
pub mod raw;
pub mod store;
pub mod types;

pub use breaker::{FailureTracker, DEFAULT_FAILED_LIMIT};
pub use error::{FetchError, NormalizationError, NormalizationReason, RunError, StoreError, StoreResult};
pub use extractor::{Extractor, Requirement, SourceConfig};
pub use guard::{AnomalyGuard, GuardConfig, JumpLimit, Tolerances};
pub use normalize::{normalize, SourceMeta};
pub use pipeline::{
    CountryPlan, Orchestrator, PipelineConfig, RunOutcome, RunResult, RunStage, SourceBinding,
    SourceReport, SourceStatus,
};
pub use raw::{RawFields, RawRow, RawValue};
pub use store::{Commit, Expected, MemoryStore, SnapshotStore};
pub use types::*;
