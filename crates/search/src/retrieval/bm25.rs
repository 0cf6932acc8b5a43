//! BM25 lexical search over an in-memory inverted index
//!
//! Han text is indexed as unigrams plus bigrams, so exact phrases such
//! as titles and names score through their bigram overlap.

use super::{rank_candidates, Candidate, Retriever, RetrieverKind, SearchRequest};
use redchamber_common::corpus::{PassageId, PassageStore, SourcePosition};
use redchamber_common::errors::{AppError, Result};
use redchamber_common::text::tokenize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// BM25 parameters
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length normalisation
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug)]
struct IndexedDoc {
    id: PassageId,
    position: SourcePosition,
    len: u32,
}

/// Inverted index: term -> (doc, term frequency)
#[derive(Debug)]
struct Bm25Index {
    postings: HashMap<String, Vec<(usize, u32)>>,
    docs: Vec<IndexedDoc>,
    avg_len: f32,
}

impl Bm25Index {
    fn build(store: &PassageStore) -> Self {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut docs = Vec::with_capacity(store.len());
        let mut total_len = 0u64;

        for (doc, passage) in store.all().iter().enumerate() {
            let tokens = tokenize(&passage.text);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens.iter() {
                *tf.entry(token.clone()).or_default() += 1;
            }
            for (term, count) in tf {
                postings.entry(term).or_default().push((doc, count));
            }

            total_len += tokens.len() as u64;
            docs.push(IndexedDoc {
                id: passage.id.clone(),
                position: passage.position,
                len: tokens.len() as u32,
            });
        }

        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / docs.len() as f32
        };

        Self {
            postings,
            docs,
            avg_len,
        }
    }

    fn idf(&self, doc_freq: usize) -> f32 {
        let n = self.docs.len() as f32;
        let df = doc_freq as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

/// Sparse retriever
pub struct Bm25Retriever {
    index: Option<Arc<Bm25Index>>,
    params: Bm25Params,
}

impl Bm25Retriever {
    /// Build the index from every passage in the store
    pub fn build(store: &PassageStore, params: Bm25Params) -> Self {
        let index = Bm25Index::build(store);
        info!(
            passages = index.docs.len(),
            terms = index.postings.len(),
            avg_len = index.avg_len,
            "BM25 index built"
        );
        Self {
            index: Some(Arc::new(index)),
            params,
        }
    }

    /// A retriever whose index was never loaded; every search is unavailable
    pub fn unloaded() -> Self {
        Self {
            index: None,
            params: Bm25Params::default(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.index.as_ref().is_some_and(|index| !index.docs.is_empty())
    }

    fn score(&self, index: &Bm25Index, request: &SearchRequest) -> Vec<Candidate> {
        // Each distinct query term counts once
        let terms: BTreeSet<String> = tokenize(&request.query).into_iter().collect();
        let Bm25Params { k1, b } = self.params;

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for term in terms.iter() {
            let Some(postings) = index.postings.get(term) else {
                continue;
            };
            let idf = index.idf(postings.len());
            for &(doc, tf) in postings {
                let tf = tf as f32;
                let len_norm = 1.0 - b + b * index.docs[doc].len as f32 / index.avg_len;
                *scores.entry(doc).or_default() += idf * tf * (k1 + 1.0) / (tf + k1 * len_norm);
            }
        }

        let candidates = scores
            .into_iter()
            .filter(|&(doc, _)| request.admits(&index.docs[doc].position))
            .map(|(doc, score)| Candidate {
                passage_id: index.docs[doc].id.clone(),
                position: index.docs[doc].position,
                source: RetrieverKind::Sparse,
                score,
            })
            .collect();

        rank_candidates(candidates, request.top_n)
    }
}

#[async_trait::async_trait]
impl Retriever for Bm25Retriever {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Candidate>> {
        let index = match &self.index {
            Some(index) if !index.docs.is_empty() => index,
            _ => {
                return Err(AppError::retrieval_unavailable(
                    "sparse",
                    "BM25 index is not loaded",
                ))
            }
        };

        let candidates = self.score(index, request);
        debug!(query = %request.query, hits = candidates.len(), "BM25 search");
        Ok(candidates)
    }

    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Sparse
    }
}
