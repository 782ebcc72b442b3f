//! Error taxonomy for fetching, normalizing, storing, and running.

use serde::{Deserialize, Serialize};

/// Why a source could not deliver raw fields for this run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Selectors or fields were not found in the fetched content.
    #[error("unexpected shape: {0}")]
    UnexpectedShape(String),
}

/// Why a raw value could not become part of a snapshot.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizationReason {
    #[error("missing")]
    Missing,

    #[error("not a non-negative integer: {0:?}")]
    NotAnInteger(String),

    #[error("not a finite non-negative number: {0:?}")]
    NotANumber(String),

    #[error("unparseable timestamp: {0:?}")]
    BadTimestamp(String),

    #[error("duplicate region: {0:?}")]
    DuplicateRegion(String),
}

/// A mandatory field failed to normalize.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("field `{field}`: {reason}")]
pub struct NormalizationError {
    pub field: String,
    pub reason: NormalizationReason,
}

impl NormalizationError {
    pub fn new(field: impl Into<String>, reason: NormalizationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

/// Errors raised by a [`crate::SnapshotStore`] backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),

    /// Another run committed for this country after we read its state.
    #[error("concurrent write detected for {country}")]
    Conflict { country: String },
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Terminal failure of a pipeline run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    #[error("mandatory source `{source_id}` failed: {error}")]
    MandatorySource { source_id: String, error: FetchError },

    #[error("no source delivered any data")]
    NoData,

    #[error("normalization failed: {error}")]
    Normalization { error: NormalizationError },

    #[error("store error: {message}")]
    Store { message: String },

    #[error("another run committed first for {country}")]
    Conflict { country: String },

    #[error("run timed out after {millis} ms")]
    Timeout { millis: u64 },
}

impl From<NormalizationError> for RunError {
    fn from(error: NormalizationError) -> Self {
        RunError::Normalization { error }
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { country } => RunError::Conflict { country },
            other => RunError::Store {
                message: other.to_string(),
            },
        }
    }
}
