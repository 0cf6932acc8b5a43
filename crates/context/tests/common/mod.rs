//! Shared fixtures: a small corpus, scripted retrievers and generators

#![allow(dead_code)]

use redchamber_common::config::{AppConfig, SynthesisConfig};
use redchamber_common::context::QueryRouter;
use redchamber_common::corpus::{Passage, PassageId, PassageStore, SourcePosition};
use redchamber_common::embeddings::HashEmbedder;
use redchamber_common::errors::{AppError, Result};
use redchamber_common::generation::ExtractiveGenerator;
use redchamber_common::{Embedder, Generator};
use redchamber_context::{AnswerSynthesizer, Orchestrator, RetryPolicy};
use redchamber_search::{
    Candidate, HybridRetriever, ResultFusion, Retriever, RetrieverKind, SearchRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn corpus() -> PassageStore {
    let passage = |id: &str, chapter: u32, para: u32, text: &str| {
        Passage::new(id, SourcePosition::new(chapter, para, para), text)
    };

    PassageStore::from_passages(vec![
        passage(
            "c003_0010",
            3,
            10,
            "黛玉两弯似蹙非蹙罥烟眉，一双似喜非喜含情目。心较比干多一窍，病如西子胜三分。",
        ),
        passage("c003_0011", 3, 11, "宝玉看罢，笑道：这个妹妹我曾见过的。"),
        passage("c027_0004", 27, 4, "黛玉独自葬花，哭道：侬今葬花人笑痴，他年葬侬知是谁？"),
        passage("c041_0002", 41, 2, "刘姥姥吃醉了酒，误入怡红院，倒在床上睡着了。"),
        passage("c070_0002", 70, 2, "众人见暮春时节，柳絮飘飞，便商议各填柳絮词一首。"),
        passage(
            "c070_0003",
            70,
            3,
            "宝钗笑道：“我这一首《临江仙》咏柳絮，白玉堂前春解舞，东风卷得均匀。”众人拍案叫绝。",
        ),
        passage("c070_0004", 70, 4, "黛玉填了一首《唐多令》，粉堕百花洲，香残燕子楼。"),
        passage("c074_0005", 74, 5, "晴雯眉眼有些像林妹妹，王夫人一见便动了气。"),
        passage("c077_0002", 77, 2, "晴雯病重被撵出大观园，宝玉偷偷去看她，两人相对垂泪。"),
        passage("c056_0001", 56, 1, "探春理家，兴利除宿弊，将园子分派给婆子们照管。"),
        passage(
            "c090_0001",
            90,
            1,
            "宝琴后来也写了一首《临江仙》咏柳絮，说是谁写的都比不上她。",
        ),
    ])
    .expect("fixture corpus is valid")
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.batch_size = 4;
    config.generation.initial_backoff_ms = 1;
    config
}

/// Real BM25 and hashing-embedder dense retrieval over the fixture corpus
pub async fn orchestrator(generator: Arc<dyn Generator>) -> Orchestrator {
    Orchestrator::from_config(
        &test_config(),
        Arc::new(corpus()),
        Arc::new(HashEmbedder::new(256)),
        generator,
    )
    .await
    .expect("orchestrator builds")
    .with_retry_policy(fast_retry())
}

/// Orchestrator over scripted retrievers
pub fn scripted_orchestrator(
    sparse: Arc<dyn Retriever>,
    dense: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
) -> Orchestrator {
    let synthesizer = AnswerSynthesizer::new(
        Arc::new(corpus()),
        generator,
        &SynthesisConfig::default(),
        Duration::from_secs(5),
    );
    Orchestrator::new(
        QueryRouter::default(),
        HybridRetriever::new(sparse, dense),
        ResultFusion::default(),
        synthesizer,
    )
    .with_retry_policy(fast_retry())
}

pub enum Script {
    Hits(Vec<(&'static str, f32)>),
    Empty,
    Unavailable,
    Broken,
    Misconfigured,
}

pub struct ScriptedRetriever {
    pub kind: RetrieverKind,
    pub script: Script,
    pub calls: AtomicUsize,
}

impl ScriptedRetriever {
    pub fn new(kind: RetrieverKind, script: Script) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl Retriever for ScriptedRetriever {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let store = corpus();
        match &self.script {
            Script::Hits(hits) => Ok(hits
                .iter()
                .take(request.top_n)
                .map(|&(id, score)| {
                    let id = PassageId::new(id);
                    let position = store
                        .get(&id)
                        .map(|p| p.position)
                        .unwrap_or(SourcePosition::new(1, 1, 1));
                    Candidate {
                        passage_id: id,
                        position,
                        source: self.kind,
                        score,
                    }
                })
                .collect()),
            Script::Empty => Ok(Vec::new()),
            Script::Unavailable => Err(AppError::retrieval_unavailable(
                self.kind.as_str(),
                "index not loaded",
            )),
            Script::Broken => Err(AppError::Internal {
                message: "index corrupted".to_string(),
            }),
            Script::Misconfigured => Err(AppError::EmbeddingSpaceMismatch {
                expected: "hash-embedding/256".to_string(),
                found: "text-embedding-3-small/1536".to_string(),
            }),
        }
    }

    fn kind(&self) -> RetrieverKind {
        self.kind
    }
}

/// Fails the first `failures` calls, then answers extractively
pub struct FlakyGenerator {
    pub failures: usize,
    pub calls: AtomicUsize,
    inner: ExtractiveGenerator,
}

impl FlakyGenerator {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
            inner: ExtractiveGenerator::new(6),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Generator for FlakyGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(AppError::synthesis_unavailable("upstream returned 503"));
        }
        self.inner.complete(prompt).await
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Embedding service that never answers
pub struct UnreachableEmbedder;

#[async_trait::async_trait]
impl Embedder for UnreachableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::EmbeddingTimeout { timeout_ms: 30_000 })
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(AppError::EmbeddingTimeout { timeout_ms: 30_000 })
    }

    fn model_name(&self) -> &str {
        "unreachable"
    }

    fn dimension(&self) -> usize {
        256
    }
}

/// Answers only after `delay`
pub struct SlowGenerator {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl Generator for SlowGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok("迟到的回答".to_string())
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}
