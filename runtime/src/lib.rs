// Copyright 2026 Casewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Casewatch runtime library: country sources, SQLite store, run feed,
//! read API and CLI handlers around the core pipeline.
//!
//! This library crate exposes the runtime modules for integration testing.

pub mod cli;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod rest;
pub mod sources;
pub mod store;

pub use config::RuntimeConfig;
pub use feed::RunFeed;
pub use fetch::HttpClient;
pub use sources::{HttpExtractor, SourceKind};
pub use store::SqliteStore;
