// Copyright 2026 Casewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Read-only HTTP API over the snapshot store and run feed.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use casewatch::{Snapshot, SnapshotStore, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::feed;

const DEFAULT_RUNS_LIMIT: usize = 50;

/// Shared state behind every handler.
pub struct ApiState {
    pub store: Arc<dyn SnapshotStore>,
    /// Run feed to serve from `/api/v1/runs`, if any.
    pub feed_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no data for country `{0}`")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run feed unavailable: {0}")]
    Feed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "E_NOT_FOUND"),
            ApiError::Store(_) | ApiError::Feed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL")
            }
        };
        let body = json!({ "error": { "code": code, "message": self.to_string() } });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// Build the axum Router with all read endpoints.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/countries", get(list_countries))
        .route("/api/v1/countries/:country/latest", get(latest))
        .route("/api/v1/countries/:country/history", get(history))
        .route("/api/v1/countries/:country/failures", get(failures))
        .route("/api/v1/runs", get(runs))
        .layer(cors)
        .with_state(state)
}

/// Start the API on `127.0.0.1:port`.
pub async fn start(port: u16, state: Arc<ApiState>) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<ApiState>) -> anyhow::Result<()> {
    tracing::info!("read API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Stored spelling of a country, matched case-insensitively.
fn resolve(state: &ApiState, country: &str) -> Result<String, ApiError> {
    state
        .store
        .countries()?
        .into_iter()
        .find(|c| c.eq_ignore_ascii_case(country))
        .ok_or_else(|| ApiError::NotFound(country.to_string()))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_countries(State(state): State<Arc<ApiState>>) -> ApiResult {
    let mut countries = Vec::new();
    for country in state.store.countries()? {
        let latest = state.store.get_latest(&country)?;
        countries.push(json!({
            "country": country,
            "observedAt": latest.as_ref().map(|s| s.observed_at),
            "infected": latest.as_ref().and_then(|s| s.content.infected),
            "deceased": latest.as_ref().and_then(|s| s.content.deceased),
            "failureCount": state.store.get_failure_count(&country)?,
        }));
    }
    Ok(Json(json!({ "countries": countries })))
}

async fn latest(
    State(state): State<Arc<ApiState>>,
    Path(country): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let name = resolve(&state, &country)?;
    let snapshot = state
        .store
        .get_latest(&name)?
        .ok_or(ApiError::NotFound(country))?;
    Ok(Json(snapshot))
}

async fn history(
    State(state): State<Arc<ApiState>>,
    Path(country): Path<String>,
    Query(params): Query<LimitParams>,
) -> ApiResult {
    let name = resolve(&state, &country)?;
    let mut entries = state.store.history(&name)?;
    if let Some(limit) = params.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    Ok(Json(json!({ "country": name, "entries": entries })))
}

async fn failures(State(state): State<Arc<ApiState>>, Path(country): Path<String>) -> ApiResult {
    let name = resolve(&state, &country)?;
    let count = state.store.get_failure_count(&name)?;
    Ok(Json(json!({ "country": name, "failureCount": count })))
}

async fn runs(State(state): State<Arc<ApiState>>, Query(params): Query<LimitParams>) -> ApiResult {
    let Some(path) = &state.feed_path else {
        return Ok(Json(json!({ "runs": [] })));
    };
    let limit = params.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    let recent = feed::read_recent(path, limit).map_err(|e| ApiError::Feed(format!("{e:#}")))?;
    Ok(Json(json!({ "runs": recent })))
}
