//! Multi-modal retrieval system
//!
//! Provides:
//! - Sparse search (BM25 over CJK n-grams)
//! - Dense search (embedding similarity)
//! - Score fusion (weighted min-max, or reciprocal rank)
//! - Concurrent fan-out to both retrievers

mod bm25;
mod fusion;
mod hybrid;
mod vector;

pub use bm25::{Bm25Params, Bm25Retriever};
pub use fusion::{FusedPassage, FusedResult, FusionStrategy, ResultFusion};
pub use hybrid::{HybridRetriever, RetrievalOutcome, RetrieverReport};
pub use vector::VectorRetriever;

use redchamber_common::corpus::{PassageId, SourcePosition};
use redchamber_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which retriever produced a candidate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    /// Lexical search
    Sparse,
    /// Embedding similarity search
    Dense,
}

impl RetrieverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrieverKind::Sparse => "sparse",
            RetrieverKind::Dense => "dense",
        }
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retriever's hit. Holds only a reference to the passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub passage_id: PassageId,

    /// Copied from the passage for deterministic tie-breaking
    pub position: SourcePosition,

    pub source: RetrieverKind,

    /// Raw retriever score (BM25 score or cosine similarity)
    pub score: f32,
}

/// Search request parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Normalised query text
    pub query: String,

    /// Maximum candidates to return
    pub top_n: usize,

    /// Inclusive chapter range; `None` searches the whole corpus
    pub chapter_range: Option<(u32, u32)>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, top_n: usize) -> Self {
        Self {
            query: query.into(),
            top_n,
            chapter_range: None,
        }
    }

    pub fn with_chapter_range(mut self, min: u32, max: u32) -> Self {
        self.chapter_range = Some((min, max));
        self
    }

    /// Whether a passage position passes the chapter filter
    pub fn admits(&self, position: &SourcePosition) -> bool {
        match self.chapter_range {
            Some((min, max)) => (min..=max).contains(&position.chapter),
            None => true,
        }
    }
}

/// Common contract for sparse and dense retrievers.
///
/// Results are ordered by descending score, at most `top_n` long, and
/// deterministic for identical index state and request. An index that is
/// not loaded fails with `RetrievalUnavailable`.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve candidates matching the query
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Candidate>>;

    /// Get the retriever kind
    fn kind(&self) -> RetrieverKind;
}

/// Sort by score descending, then corpus position, then id; truncate to `top_n`
pub(crate) fn rank_candidates(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| a.passage_id.cmp(&b.passage_id))
    });
    candidates.truncate(top_n);
    candidates
}
