//! Question answering handler

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::orchestrator::{AnswerReport, AnswerRequest};
use crate::AppState;
use redchamber_common::errors::{AppError, Result};

/// Answer request body
#[derive(Debug, Deserialize, Validate)]
pub struct AnswerBody {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Passage budget override
    #[validate(range(min = 1, max = 50))]
    #[serde(default)]
    pub passage_budget: Option<usize>,
}

/// Answer one question
pub async fn answer(
    State(state): State<AppState>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<AnswerReport>> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if body.query.trim().is_empty() {
        return Err(AppError::Validation {
            message: "query must not be blank".to_string(),
            field: Some("query".to_string()),
        });
    }

    let request = AnswerRequest {
        query: body.query,
        passage_budget: body.passage_budget,
    };

    let report = state.orchestrator.answer(request).await?;
    Ok(Json(report))
}
