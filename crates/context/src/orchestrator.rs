//! Orchestrator - routes, retrieves, fuses and synthesizes one question
//!
//! State machine:
//! `Routing -> Retrieving -> Fusing -> Synthesizing -> Done`, with
//! `Degraded` as the terminal state for absorbed failures.
//!
//! Retriever and generation failures become a degraded but valid
//! `Answer`. Only configuration-class errors are returned as `Err`.

use crate::synthesizer::{Answer, AnswerSynthesizer};
use backoff::{future::retry, ExponentialBackoff};
use redchamber_common::config::AppConfig;
use redchamber_common::context::{QueryClass, QueryRouter, RoutingSignals, RoutingWeights};
use redchamber_common::errors::Result;
use redchamber_common::metrics::{record_degraded, record_fusion, AnswerMetrics};
use redchamber_common::{Embedder, Generator, PassageStore};
use redchamber_search::{
    Bm25Params, Bm25Retriever, FusedResult, HybridRetriever, ResultFusion, Retriever,
    RetrieverReport, VectorRetriever,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Routing,
    Retrieving,
    Fusing,
    Synthesizing,
    Done,
    Degraded,
}

/// One question
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerRequest {
    pub query: String,

    /// Overrides the configured passage budget K
    #[serde(default)]
    pub passage_budget: Option<usize>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            passage_budget: None,
        }
    }

    pub fn with_passage_budget(mut self, budget: usize) -> Self {
        self.passage_budget = Some(budget);
        self
    }
}

/// Diagnostics collected along the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerTrace {
    pub query: String,
    pub class: QueryClass,
    pub weights: RoutingWeights,
    pub signals: RoutingSignals,
    pub state: PipelineState,
    pub retrievers: Vec<RetrieverReport>,
    pub fused_passages: usize,
    pub synthesis_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    pub elapsed_ms: u64,
}

/// Answer plus the trace that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerReport {
    #[serde(flatten)]
    pub answer: Answer,
    pub trace: AnswerTrace,
}

/// Retry budget for the generation call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            current_interval: self.initial_backoff,
            max_interval: self.initial_backoff * 8,
            multiplier: 2.0,
            // The attempt counter bounds retries, not the clock
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Top-level answer pipeline
pub struct Orchestrator {
    router: QueryRouter,
    retrieval: HybridRetriever,
    fusion: ResultFusion,
    synthesizer: AnswerSynthesizer,
    passage_budget: usize,
    chapter_range: Option<(u32, u32)>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        router: QueryRouter,
        retrieval: HybridRetriever,
        fusion: ResultFusion,
        synthesizer: AnswerSynthesizer,
    ) -> Self {
        Self {
            router,
            retrieval,
            fusion,
            synthesizer,
            passage_budget: 6,
            chapter_range: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Build every component from configuration. Index build errors such
    /// as `EmbeddingSpaceMismatch` are returned here, before any query.
    pub async fn from_config(
        config: &AppConfig,
        store: Arc<PassageStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;

        let sparse: Arc<dyn Retriever> =
            Arc::new(Bm25Retriever::build(&store, Bm25Params::default()));
        let dense: Arc<dyn Retriever> = Arc::new(
            VectorRetriever::build(&store, embedder, config.embedding.batch_size)
                .await?
                .with_min_similarity(config.retrieval.min_dense_similarity),
        );

        let retrieval = HybridRetriever::new(sparse, dense)
            .with_top_n(config.retrieval.sparse_top_n, config.retrieval.dense_top_n);
        let synthesizer = AnswerSynthesizer::new(
            store,
            generator,
            &config.synthesis,
            config.generation_timeout(),
        );
        let (chapter_min, chapter_max) = config.chapter_range();

        Ok(Self::new(
            QueryRouter::new(&config.router),
            retrieval,
            ResultFusion::from_config(&config.fusion)?,
            synthesizer,
        )
        .with_passage_budget(config.retrieval.passage_budget)
        .with_chapter_range(chapter_min, chapter_max)
        .with_retry_policy(RetryPolicy {
            max_retries: config.generation.max_retries,
            initial_backoff: Duration::from_millis(config.generation.initial_backoff_ms),
        }))
    }

    pub fn with_passage_budget(mut self, budget: usize) -> Self {
        self.passage_budget = budget.max(1);
        self
    }

    pub fn with_chapter_range(mut self, min: u32, max: u32) -> Self {
        self.chapter_range = Some((min, max));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Answer one question
    #[instrument(skip(self, request), fields(query_len = request.query.len()))]
    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerReport> {
        let start = Instant::now();
        let mut state = PipelineState::Routing;

        let query = self.router.classify(&request.query);
        let metrics = AnswerMetrics::start(query.class.as_str());
        debug!(
            class = %query.class,
            sparse_weight = query.weights.sparse(),
            dense_weight = query.weights.dense(),
            "Query routed"
        );

        let mut trace = AnswerTrace {
            query: query.text.clone(),
            class: query.class,
            weights: query.weights,
            signals: query.signals,
            state,
            retrievers: Vec::new(),
            fused_passages: 0,
            synthesis_attempts: 0,
            degraded_reason: None,
            elapsed_ms: 0,
        };

        transition(&mut state, PipelineState::Retrieving);
        let outcome = self
            .retrieval
            .retrieve(&query.text, self.chapter_range)
            .await?;
        trace.retrievers = outcome.reports.clone();

        if outcome.all_unavailable() {
            warn!("Both retrievers unavailable");
            transition(&mut state, PipelineState::Degraded);
            return Ok(self.finish(
                Answer::no_evidence(),
                trace,
                state,
                "no_evidence",
                start,
                metrics,
            ));
        }

        transition(&mut state, PipelineState::Fusing);
        let budget = request.passage_budget.unwrap_or(self.passage_budget).max(1);
        let fused = self
            .fusion
            .fuse(&outcome.sparse, &outcome.dense, query.weights, budget);
        record_fusion(self.fusion.strategy().as_str(), fused.len());
        trace.fused_passages = fused.len();
        debug!(fused = fused.len(), top_score = ?fused.top_score(), "Candidates fused");

        if fused.is_empty() {
            transition(&mut state, PipelineState::Degraded);
            return Ok(self.finish(
                Answer::insufficient_evidence(),
                trace,
                state,
                "insufficient_evidence",
                start,
                metrics,
            ));
        }

        transition(&mut state, PipelineState::Synthesizing);
        let attempts = AtomicU32::new(0);
        let synthesized = self.synthesize_with_retry(&query.text, &fused, &attempts).await;
        trace.synthesis_attempts = attempts.load(Ordering::SeqCst);

        match synthesized {
            Ok(answer) if answer.degraded => {
                // Every fused id was missing from the store
                transition(&mut state, PipelineState::Degraded);
                Ok(self.finish(answer, trace, state, "insufficient_evidence", start, metrics))
            }
            Ok(answer) => {
                transition(&mut state, PipelineState::Done);
                trace.state = state;
                trace.elapsed_ms = start.elapsed().as_millis() as u64;
                metrics.finish(answer.degraded);
                info!(
                    class = %trace.class,
                    citations = answer.citations.len(),
                    confidence = ?answer.confidence,
                    elapsed_ms = trace.elapsed_ms,
                    "Answer synthesized"
                );
                Ok(AnswerReport { answer, trace })
            }
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                warn!(
                    error = %e,
                    attempts = trace.synthesis_attempts,
                    "Synthesis failed, returning excerpts"
                );
                transition(&mut state, PipelineState::Degraded);
                let answer = self.synthesizer.excerpt_answer(&fused);
                Ok(self.finish(answer, trace, state, "synthesis_unavailable", start, metrics))
            }
        }
    }

    /// One attempt plus up to `max_retries` more, with exponential backoff
    async fn synthesize_with_retry(
        &self,
        query: &str,
        fused: &FusedResult,
        attempts: &AtomicU32,
    ) -> Result<Answer> {
        let synthesizer = &self.synthesizer;
        let max_retries = self.retry.max_retries;

        retry(self.retry.backoff(), move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match synthesizer.synthesize(query, fused).await {
                Ok(answer) => Ok(answer),
                Err(e) if e.is_recoverable() && attempt <= max_retries => {
                    debug!(attempt, error = %e, "Synthesis attempt failed, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    fn finish(
        &self,
        answer: Answer,
        mut trace: AnswerTrace,
        state: PipelineState,
        reason: &'static str,
        start: Instant,
        metrics: AnswerMetrics,
    ) -> AnswerReport {
        record_degraded(reason);
        metrics.finish(true);
        trace.state = state;
        trace.degraded_reason = Some(reason.to_string());
        trace.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(reason, elapsed_ms = trace.elapsed_ms, "Degraded answer");
        AnswerReport { answer, trace }
    }
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    debug!(from = ?*state, to = ?next, "Pipeline transition");
    *state = next;
}
