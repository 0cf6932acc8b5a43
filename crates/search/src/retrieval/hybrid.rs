//! Concurrent fan-out to the sparse and dense retrievers
//!
//! Both searches run at the same time. A retriever that fails is reported
//! as unavailable and contributes no candidates. Only configuration-class
//! errors are returned to the caller.

use super::{Candidate, Retriever, RetrieverKind, SearchRequest};
use redchamber_common::errors::Result;
use redchamber_common::metrics::record_retrieval;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Per-retriever outcome, kept for the answer trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverReport {
    pub retriever: RetrieverKind,

    pub available: bool,

    pub hits: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

/// Candidates from both retrievers
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub sparse: Vec<Candidate>,
    pub dense: Vec<Candidate>,
    pub reports: Vec<RetrieverReport>,
}

impl RetrievalOutcome {
    /// No retriever answered
    pub fn all_unavailable(&self) -> bool {
        self.reports.iter().all(|r| !r.available)
    }

    /// At least one retriever failed
    pub fn any_unavailable(&self) -> bool {
        self.reports.iter().any(|r| !r.available)
    }
}

/// Runs both retrievers for one query
pub struct HybridRetriever {
    sparse: Arc<dyn Retriever>,
    dense: Arc<dyn Retriever>,
    sparse_top_n: usize,
    dense_top_n: usize,
}

impl HybridRetriever {
    pub fn new(sparse: Arc<dyn Retriever>, dense: Arc<dyn Retriever>) -> Self {
        Self {
            sparse,
            dense,
            sparse_top_n: 50,
            dense_top_n: 50,
        }
    }

    /// Candidate pool size per retriever
    pub fn with_top_n(mut self, sparse_top_n: usize, dense_top_n: usize) -> Self {
        self.sparse_top_n = sparse_top_n;
        self.dense_top_n = dense_top_n;
        self
    }

    /// Search both retrievers concurrently
    pub async fn retrieve(
        &self,
        query: &str,
        chapter_range: Option<(u32, u32)>,
    ) -> Result<RetrievalOutcome> {
        let mut sparse_request = SearchRequest::new(query, self.sparse_top_n);
        let mut dense_request = SearchRequest::new(query, self.dense_top_n);
        sparse_request.chapter_range = chapter_range;
        dense_request.chapter_range = chapter_range;

        let (sparse, dense) = tokio::join!(
            timed(self.sparse.as_ref(), &sparse_request),
            timed(self.dense.as_ref(), &dense_request)
        );

        let (sparse, sparse_report) = settle(RetrieverKind::Sparse, sparse)?;
        let (dense, dense_report) = settle(RetrieverKind::Dense, dense)?;

        debug!(
            sparse_hits = sparse.len(),
            dense_hits = dense.len(),
            "Hybrid retrieval complete"
        );

        Ok(RetrievalOutcome {
            sparse,
            dense,
            reports: vec![sparse_report, dense_report],
        })
    }
}

async fn timed(
    retriever: &dyn Retriever,
    request: &SearchRequest,
) -> (Result<Vec<Candidate>>, u64) {
    let start = Instant::now();
    let result = retriever.search(request).await;
    let elapsed = start.elapsed();
    record_retrieval(
        retriever.kind().as_str(),
        elapsed.as_secs_f64(),
        result.is_ok(),
    );
    (result, elapsed.as_millis() as u64)
}

fn settle(
    kind: RetrieverKind,
    (result, duration_ms): (Result<Vec<Candidate>>, u64),
) -> Result<(Vec<Candidate>, RetrieverReport)> {
    match result {
        Ok(candidates) => {
            let report = RetrieverReport {
                retriever: kind,
                available: true,
                hits: candidates.len(),
                error: None,
                duration_ms,
            };
            Ok((candidates, report))
        }
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => {
            warn!(retriever = %kind, error = %e, "Retriever unavailable");
            let report = RetrieverReport {
                retriever: kind,
                available: false,
                hits: 0,
                error: Some(e.to_string()),
                duration_ms,
            };
            Ok((Vec::new(), report))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redchamber_common::corpus::{PassageId, SourcePosition};
    use redchamber_common::errors::AppError;

    enum Behaviour {
        Hits(Vec<&'static str>),
        Unavailable,
        Broken,
        Misconfigured,
    }

    struct FakeRetriever {
        kind: RetrieverKind,
        behaviour: Behaviour,
    }

    #[async_trait::async_trait]
    impl Retriever for FakeRetriever {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<Candidate>> {
            match &self.behaviour {
                Behaviour::Hits(ids) => Ok(ids
                    .iter()
                    .take(request.top_n)
                    .enumerate()
                    .map(|(i, id)| Candidate {
                        passage_id: PassageId::new(id),
                        position: SourcePosition::new(1, i as u32 + 1, i as u32 + 1),
                        source: self.kind,
                        score: 1.0 / (i as f32 + 1.0),
                    })
                    .collect()),
                Behaviour::Unavailable => Err(AppError::retrieval_unavailable(
                    self.kind.as_str(),
                    "index offline",
                )),
                Behaviour::Broken => Err(AppError::Internal {
                    message: "index corrupted".to_string(),
                }),
                Behaviour::Misconfigured => Err(AppError::EmbeddingSpaceMismatch {
                    expected: "bge/1024".to_string(),
                    found: "ada/1536".to_string(),
                }),
            }
        }

        fn kind(&self) -> RetrieverKind {
            self.kind
        }
    }

    fn hybrid(sparse: Behaviour, dense: Behaviour) -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(FakeRetriever {
                kind: RetrieverKind::Sparse,
                behaviour: sparse,
            }),
            Arc::new(FakeRetriever {
                kind: RetrieverKind::Dense,
                behaviour: dense,
            }),
        )
    }

    #[tokio::test]
    async fn test_both_available() {
        let outcome = tokio_test::assert_ok!(
            hybrid(Behaviour::Hits(vec!["a", "b"]), Behaviour::Hits(vec!["c"]))
                .with_top_n(1, 5)
                .retrieve("黛玉", None)
                .await
        );
        assert_eq!(outcome.sparse.len(), 1);
        assert_eq!(outcome.dense.len(), 1);
        assert!(!outcome.any_unavailable());
    }

    #[tokio::test]
    async fn test_one_unavailable_is_reported() {
        let outcome = hybrid(Behaviour::Hits(vec!["a"]), Behaviour::Unavailable)
            .retrieve("黛玉", Some((1, 80)))
            .await
            .unwrap();
        assert_eq!(outcome.sparse.len(), 1);
        assert!(outcome.dense.is_empty());
        assert!(outcome.any_unavailable());
        assert!(!outcome.all_unavailable());

        let dense = &outcome.reports[1];
        assert_eq!(dense.retriever, RetrieverKind::Dense);
        assert!(!dense.available);
        assert!(dense.error.as_deref().unwrap().contains("index offline"));
    }

    #[tokio::test]
    async fn test_both_unavailable() {
        let outcome = hybrid(Behaviour::Unavailable, Behaviour::Unavailable)
            .retrieve("黛玉", None)
            .await
            .unwrap();
        assert!(outcome.all_unavailable());
    }

    #[tokio::test]
    async fn test_internal_failure_is_reported_unavailable() {
        let outcome = tokio_test::assert_ok!(
            hybrid(Behaviour::Hits(vec!["a"]), Behaviour::Broken)
                .retrieve("黛玉", None)
                .await
        );
        assert_eq!(outcome.sparse.len(), 1);
        let dense = &outcome.reports[1];
        assert!(!dense.available);
        assert!(dense.error.as_deref().unwrap().contains("index corrupted"));
    }

    #[tokio::test]
    async fn test_configuration_error_propagates() {
        let err = hybrid(Behaviour::Hits(vec!["a"]), Behaviour::Misconfigured)
            .retrieve("黛玉", None)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
