//! Redchamber Common Library
//!
//! Shared code for the Redchamber services including:
//! - The read-only passage store
//! - Query routing
//! - Embedding and generation capability providers
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod context;
pub mod corpus;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use corpus::{Passage, PassageId, PassageStore, SourcePosition};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use generation::Generator;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
