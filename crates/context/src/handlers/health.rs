//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use redchamber_common::VERSION;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    pub corpus: CorpusCheck,
}

#[derive(Serialize)]
pub struct CorpusCheck {
    pub status: String,
    pub passages: usize,
    pub content_hash: String,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
    })
}

/// Readiness probe - the corpus is loaded and non-empty
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let loaded = !state.store.is_empty();

    Json(ReadyResponse {
        status: if loaded { "ready" } else { "not_ready" }.to_string(),
        checks: ReadyChecks {
            corpus: CorpusCheck {
                status: if loaded { "up" } else { "down" }.to_string(),
                passages: state.store.len(),
                content_hash: state.store.content_hash().to_string(),
            },
        },
    })
}
