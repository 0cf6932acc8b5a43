//! Redchamber Search Library
//!
//! Sparse and dense retrieval over the passage store, the concurrent
//! fan-out that runs them together, and fusion of their candidate lists.

pub mod retrieval;

pub use retrieval::{
    Bm25Params, Bm25Retriever, Candidate, FusedPassage, FusedResult, FusionStrategy,
    HybridRetriever, ResultFusion, RetrievalOutcome, Retriever, RetrieverKind, RetrieverReport,
    SearchRequest, VectorRetriever,
};
