//! Error types for Redchamber services
//!
//! Provides a single error enum shared by every component with:
//! - Distinct variants for recoverable retrieval/synthesis outages
//! - Configuration-class errors that must never be swallowed
//! - HTTP status code mapping
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Resource errors (4xxx)
    PassageNotFound,

    // Corpus errors (5xxx)
    CorpusLoadError,
    DuplicatePassage,

    // External capability errors (8xxx)
    RetrievalUnavailable,
    SynthesisUnavailable,
    EmbeddingError,
    EmbeddingTimeout,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    EmbeddingSpaceMismatch,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::PassageNotFound => 4002,

            ErrorCode::CorpusLoadError => 5001,
            ErrorCode::DuplicatePassage => 5002,

            ErrorCode::RetrievalUnavailable => 8001,
            ErrorCode::SynthesisUnavailable => 8002,
            ErrorCode::EmbeddingError => 8003,
            ErrorCode::EmbeddingTimeout => 8004,
            ErrorCode::UpstreamError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::EmbeddingSpaceMismatch => 9003,
            ErrorCode::SerializationError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Passage not found: {id}")]
    PassageNotFound { id: String },

    // Corpus errors
    #[error("Failed to load corpus at line {line}: {message}")]
    CorpusLoad { line: usize, message: String },

    #[error("Duplicate passage identifier: {id}")]
    DuplicatePassage { id: String },

    // Recoverable capability outages
    #[error("Retrieval unavailable ({retriever}): {message}")]
    RetrievalUnavailable { retriever: String, message: String },

    #[error("Synthesis unavailable: {message}")]
    SynthesisUnavailable { message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Configuration-class errors
    #[error("Embedding space mismatch: index expects {expected}, found {found}")]
    EmbeddingSpaceMismatch { expected: String, found: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Shorthand for a retriever outage
    pub fn retrieval_unavailable(retriever: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::RetrievalUnavailable {
            retriever: retriever.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a generation service outage
    pub fn synthesis_unavailable(message: impl Into<String>) -> Self {
        AppError::SynthesisUnavailable {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::PassageNotFound { .. } => ErrorCode::PassageNotFound,
            AppError::CorpusLoad { .. } => ErrorCode::CorpusLoadError,
            AppError::DuplicatePassage { .. } => ErrorCode::DuplicatePassage,
            AppError::RetrievalUnavailable { .. } => ErrorCode::RetrievalUnavailable,
            AppError::SynthesisUnavailable { .. } => ErrorCode::SynthesisUnavailable,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::EmbeddingSpaceMismatch { .. } => ErrorCode::EmbeddingSpaceMismatch,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::PassageNotFound { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            AppError::CorpusLoad { .. }
            | AppError::DuplicatePassage { .. }
            | AppError::EmbeddingSpaceMismatch { .. }
            | AppError::Configuration { .. }
            | AppError::Internal { .. }
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. }
            | AppError::EmbeddingTimeout { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::RetrievalUnavailable { .. } | AppError::SynthesisUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Component-local failures the orchestrator absorbs into a degraded answer.
    ///
    /// Configuration-class errors return `false` and must reach the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::RetrievalUnavailable { .. }
                | AppError::SynthesisUnavailable { .. }
                | AppError::EmbeddingError { .. }
                | AppError::EmbeddingTimeout { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Configuration-class errors: detected at startup or index build
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingSpaceMismatch { .. }
                | AppError::Configuration { .. }
                | AppError::CorpusLoad { .. }
                | AppError::DuplicatePassage { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::PassageNotFound { id: "c001_0001".into() };
        assert_eq!(err.code(), ErrorCode::PassageNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_retrieval_outage_is_recoverable() {
        let err = AppError::retrieval_unavailable("dense", "embedding service down");
        assert!(err.is_recoverable());
        assert!(!err.is_configuration());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code().as_code(), 8001);
    }

    #[test]
    fn test_embedding_mismatch_is_fatal() {
        let err = AppError::EmbeddingSpaceMismatch {
            expected: "bge-large-zh-v1.5/1024".into(),
            found: "text-embedding-3-small/1536".into(),
        };
        assert!(!err.is_recoverable());
        assert!(err.is_configuration());
        assert!(err.is_server_error());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "query must not be empty".into(),
            field: Some("query".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }
}
