//! Dense similarity search over passage embeddings
//!
//! The index is built once from the passage store. Every vector in it and
//! every query vector come from the same embedder; mixing spaces is
//! rejected at build time with `EmbeddingSpaceMismatch`.

use super::{rank_candidates, Candidate, Retriever, RetrieverKind, SearchRequest};
use redchamber_common::corpus::{Passage, PassageId, PassageStore, SourcePosition};
use redchamber_common::embeddings::{normalize, Embedder};
use redchamber_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct IndexedVector {
    id: PassageId,
    position: SourcePosition,
    /// Unit length, so inner product is cosine similarity
    vector: Vec<f32>,
}

/// Dense retriever
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    vectors: Vec<IndexedVector>,
    min_similarity: f32,
}

impl VectorRetriever {
    /// Build the index: reuse precomputed embeddings when they belong to
    /// `embedder`'s space, embed the rest in batches.
    pub async fn build(
        store: &PassageStore,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Result<Self> {
        let space = embedder.space();
        let dimension = embedder.dimension();

        let mut vectors = Vec::with_capacity(store.len());
        let mut missing = Vec::new();

        for passage in store.all() {
            match (&passage.embedding, &passage.embedding_model) {
                (Some(embedding), model) => {
                    let model = model.as_deref().unwrap_or("unknown");
                    if model != embedder.model_name() || embedding.len() != dimension {
                        return Err(AppError::EmbeddingSpaceMismatch {
                            expected: space,
                            found: format!("{}/{} (passage {})", model, embedding.len(), passage.id),
                        });
                    }
                    let mut vector = embedding.clone();
                    normalize(&mut vector);
                    vectors.push(IndexedVector {
                        id: passage.id.clone(),
                        position: passage.position,
                        vector,
                    });
                }
                (None, _) => missing.push(passage),
            }
        }

        let precomputed = vectors.len();
        let embedded = embed_missing(&missing, embedder.as_ref(), batch_size).await;
        match embedded {
            Ok(embedded) => vectors.extend(embedded),
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                warn!(
                    space = %space,
                    error = %e,
                    "Embedding service failed, dense index left unloaded"
                );
                return Ok(Self::unloaded(embedder));
            }
        }

        info!(
            space = %space,
            precomputed,
            embedded = missing.len(),
            "Dense index built"
        );

        Ok(Self {
            embedder,
            vectors,
            min_similarity: f32::MIN,
        })
    }

    /// An index with no vectors; every search reports the retriever unavailable
    pub fn unloaded(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            vectors: Vec::new(),
            min_similarity: f32::MIN,
        }
    }

    /// Drop candidates whose similarity falls below `min`
    pub fn with_min_similarity(mut self, min: f32) -> Self {
        self.min_similarity = min;
        self
    }

    /// Embedding space of the index
    pub fn space(&self) -> String {
        self.embedder.space()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Candidate>> {
        if self.vectors.is_empty() {
            return Err(AppError::retrieval_unavailable(
                "dense",
                "vector index is not loaded",
            ));
        }
        if request.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut query = self.embedder.embed(&request.query).await.map_err(|e| {
            if e.is_configuration() {
                return e;
            }
            warn!(error = %e, "Query embedding failed");
            AppError::retrieval_unavailable("dense", e.to_string())
        })?;
        if query.len() != self.embedder.dimension() {
            return Err(AppError::retrieval_unavailable(
                "dense",
                format!(
                    "query embedding has dimension {}, index expects {}",
                    query.len(),
                    self.embedder.dimension()
                ),
            ));
        }
        normalize(&mut query);

        let candidates = self
            .vectors
            .iter()
            .filter(|v| request.admits(&v.position))
            .map(|v| Candidate {
                passage_id: v.id.clone(),
                position: v.position,
                source: RetrieverKind::Dense,
                score: v.vector.iter().zip(&query).map(|(a, b)| a * b).sum(),
            })
            .filter(|c| c.score >= self.min_similarity)
            .collect();

        let ranked = rank_candidates(candidates, request.top_n);
        debug!(query = %request.query, hits = ranked.len(), "Dense search");
        Ok(ranked)
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Dense
    }
}

async fn embed_missing(
    missing: &[&Passage],
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<Vec<IndexedVector>> {
    let dimension = embedder.dimension();
    let mut vectors = Vec::with_capacity(missing.len());

    for batch in missing.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        if embeddings.len() != batch.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "embedder returned {} vectors for {} passages",
                    embeddings.len(),
                    batch.len()
                ),
            });
        }
        for (passage, mut vector) in batch.iter().zip(embeddings) {
            if vector.len() != dimension {
                return Err(AppError::EmbeddingSpaceMismatch {
                    expected: embedder.space(),
                    found: format!("{}/{}", embedder.model_name(), vector.len()),
                });
            }
            normalize(&mut vector);
            vectors.push(IndexedVector {
                id: passage.id.clone(),
                position: passage.position,
                vector,
            });
        }
    }

    Ok(vectors)
}
