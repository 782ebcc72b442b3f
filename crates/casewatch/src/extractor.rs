//! Extractor abstraction: one implementation per source kind.
//!
//! Extractors own fetching and field selection; the pipeline only sees the
//! resulting [`RawFields`] or a [`FetchError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::raw::RawFields;
use crate::types::Counter;

/// Whether a run can proceed without a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Failure fails the whole run.
    Mandatory,
    /// Failure is logged and the source is skipped.
    BestEffort,
}

/// Static description of one source for one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub url: String,
    pub requirement: Requirement,
    /// Counters this source must deliver when it is available.
    #[serde(default)]
    pub mandatory_fields: Vec<Counter>,
    /// Extra request headers (e.g. a referer some APIs insist on).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>, requirement: Requirement) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            requirement,
            mandatory_fields: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_mandatory(mut self, fields: impl IntoIterator<Item = Counter>) -> Self {
        self.mandatory_fields.extend(fields);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.requirement == Requirement::Mandatory
    }
}

/// Turns a source's fetched content into raw fields.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawFields, FetchError>;
}
