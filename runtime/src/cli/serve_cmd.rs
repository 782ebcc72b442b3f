//! `casewatch serve`: run the read API until interrupted.

use crate::config::RuntimeConfig;
use crate::rest::{self, ApiState};
use crate::store::SqliteStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub async fn run(port: u16, config: &RuntimeConfig) -> Result<()> {
    let store = SqliteStore::open(&config.store_path())?;
    let state = Arc::new(ApiState {
        store: Arc::new(store),
        feed_path: Some(config.feed_path()),
    });

    info!("serving data from {}", config.data_dir.display());
    tokio::select! {
        result = rest::start(port, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down read API");
            Ok(())
        }
    }
}
