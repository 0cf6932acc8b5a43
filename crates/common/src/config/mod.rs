//! Configuration management for Redchamber services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Corpus location and scope
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation (completion) provider configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Query routing weights
    #[serde(default)]
    pub router: RouterConfig,

    /// Retrieval fan-out and passage budget
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Fusion strategy
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Answer synthesis
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// JSONL file produced by the chunker
    #[serde(default = "default_passages_path")]
    pub passages_path: String,

    /// First chapter eligible for retrieval (inclusive)
    #[serde(default = "default_chapter_min")]
    pub chapter_min: u32,

    /// Last chapter eligible for retrieval (inclusive)
    #[serde(default = "default_chapter_max")]
    pub chapter_max: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries per request
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for index-build embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: openai, extractive
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// Chat completions endpoint
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Per-call timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first failed call
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,

    /// Initial backoff between attempts in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Sparse weight for lookup-class queries
    #[serde(default = "default_lookup_sparse_weight")]
    pub lookup_sparse_weight: f32,

    /// Sparse weight for inferential-class queries
    #[serde(default = "default_inferential_sparse_weight")]
    pub inferential_sparse_weight: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Candidates requested from the sparse retriever
    #[serde(default = "default_top_n")]
    pub sparse_top_n: usize,

    /// Candidates requested from the dense retriever
    #[serde(default = "default_top_n")]
    pub dense_top_n: usize,

    /// Passage budget K after fusion
    #[serde(default = "default_passage_budget")]
    pub passage_budget: usize,

    /// Dense candidates below this similarity are dropped
    #[serde(default)]
    pub min_dense_similarity: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FusionConfig {
    /// Fusion strategy: weighted, rrf
    #[serde(default = "default_fusion_strategy")]
    pub strategy: String,

    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    /// Top fused score must exceed this for a high-confidence answer
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Paragraph window for neighbor expansion (0 disables)
    #[serde(default = "default_neighbor_window")]
    pub neighbor_window: u32,

    /// Characters kept per passage in a degraded excerpt answer
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level / filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Prometheus metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_passages_path() -> String { "data/chunks.jsonl".to_string() }
fn default_chapter_min() -> u32 { 1 }
fn default_chapter_max() -> u32 { 80 }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_model() -> String { "BAAI/bge-large-zh-v1.5".to_string() }
fn default_embedding_dimension() -> usize { 1024 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_generation_provider() -> String { "extractive".to_string() }
fn default_generation_endpoint() -> String { "https://api.deepseek.com/v1/chat/completions".to_string() }
fn default_generation_model() -> String { "deepseek-chat".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> usize { 1200 }
fn default_generation_timeout() -> u64 { 45 }
fn default_generation_retries() -> u32 { 1 }
fn default_initial_backoff() -> u64 { 500 }
fn default_lookup_sparse_weight() -> f32 { 0.8 }
fn default_inferential_sparse_weight() -> f32 { 0.2 }
fn default_top_n() -> usize { 50 }
fn default_passage_budget() -> usize { 6 }
fn default_fusion_strategy() -> String { "weighted".to_string() }
fn default_rrf_k() -> f32 { 60.0 }
fn default_relevance_threshold() -> f32 { 0.5 }
fn default_neighbor_window() -> u32 { 1 }
fn default_excerpt_chars() -> usize { 240 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            passages_path: default_passages_path(),
            chapter_min: default_chapter_min(),
            chapter_max: default_chapter_max(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            endpoint: default_generation_endpoint(),
            api_key: None,
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lookup_sparse_weight: default_lookup_sparse_weight(),
            inferential_sparse_weight: default_inferential_sparse_weight(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            sparse_top_n: default_top_n(),
            dense_top_n: default_top_n(),
            passage_budget: default_passage_budget(),
            min_dense_similarity: 0.0,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: default_fusion_strategy(),
            rrf_k: default_rrf_k(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: default_relevance_threshold(),
            neighbor_window: default_neighbor_window(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__RETRIEVAL__PASSAGE_BUDGET=8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings that would break routing or fusion invariants
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("router.lookup_sparse_weight", self.router.lookup_sparse_weight),
            ("router.inferential_sparse_weight", self.router.inferential_sparse_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(AppError::Configuration {
                    message: format!("{} must be within [0, 1], got {}", name, weight),
                });
            }
        }

        if self.retrieval.passage_budget == 0 {
            return Err(AppError::Configuration {
                message: "retrieval.passage_budget must be at least 1".to_string(),
            });
        }

        if self.corpus.chapter_min > self.corpus.chapter_max {
            return Err(AppError::Configuration {
                message: format!(
                    "corpus chapter range is empty: {}..={}",
                    self.corpus.chapter_min, self.corpus.chapter_max
                ),
            });
        }

        if !matches!(self.fusion.strategy.as_str(), "weighted" | "rrf") {
            return Err(AppError::Configuration {
                message: format!("unknown fusion strategy: {}", self.fusion.strategy),
            });
        }

        if self.fusion.rrf_k <= 0.0 {
            return Err(AppError::Configuration {
                message: format!("fusion.rrf_k must be positive, got {}", self.fusion.rrf_k),
            });
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get generation call timeout as Duration
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    /// Inclusive chapter range eligible for retrieval
    pub fn chapter_range(&self) -> (u32, u32) {
        (self.corpus.chapter_min, self.corpus.chapter_max)
    }
}
