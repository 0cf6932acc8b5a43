//! Redchamber Context Engine
//!
//! Answers questions about the corpus:
//! - Query routing and hybrid retrieval
//! - Result fusion under routing weights
//! - Grounded synthesis with retry and degraded fallbacks
//! - HTTP API over the orchestrator

pub mod handlers;
pub mod orchestrator;
pub mod synthesizer;

pub use orchestrator::{
    AnswerReport, AnswerRequest, AnswerTrace, Orchestrator, PipelineState, RetryPolicy,
};
pub use synthesizer::{Answer, AnswerSynthesizer, Confidence};

use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use redchamber_common::{config::AppConfig, PassageStore};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<PassageStore>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new().route("/answer", post(handlers::answer::answer));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout(),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
