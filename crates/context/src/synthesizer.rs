//! Answer Synthesizer - grounded answers from fused passages
//!
//! Provides:
//! - Grounding prompt construction (hits first, then neighbor context)
//! - Time-bounded calls to the generation service
//! - Confidence from the top fused score
//! - Insufficient-evidence and raw-excerpt answers that skip generation

use redchamber_common::config::SynthesisConfig;
use redchamber_common::corpus::{Passage, PassageId, PassageStore};
use redchamber_common::errors::{AppError, Result};
use redchamber_common::metrics::record_synthesis_attempt;
use redchamber_common::Generator;
use redchamber_search::FusedResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Returned when fusion produced nothing to ground an answer on
pub const INSUFFICIENT_EVIDENCE: &str = "原文中没有找到足以回答这个问题的依据。";

/// Returned when neither retriever could be reached
pub const NO_EVIDENCE: &str = "检索暂不可用，没有找到可引用的原文依据。";

/// Header of an answer made of raw excerpts instead of generated text
pub const EXCERPT_HEADER: &str = "（未能生成综合回答，以下为检索到的原文摘录）";

const PERSONA: &str = "你是一位研究《红楼梦》的学者。";

const INSTRUCTIONS: &str = "请只根据下面提供的原文片段回答问题，不要引入原文之外的说法。\
每个论点请注明出处（第几回第几段）。如果原文不足以回答，请直接说明不确定。";

/// Answer confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low,
}

/// Final answer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer_text: String,

    /// Passages placed in the context, in prompt order
    pub citations: Vec<PassageId>,

    pub confidence: Confidence,

    pub degraded: bool,
}

impl Answer {
    /// Nothing was retrieved; generation is never called
    pub fn insufficient_evidence() -> Self {
        Self {
            answer_text: INSUFFICIENT_EVIDENCE.to_string(),
            citations: Vec::new(),
            confidence: Confidence::Low,
            degraded: true,
        }
    }

    /// Both retrievers were unavailable
    pub fn no_evidence() -> Self {
        Self {
            answer_text: NO_EVIDENCE.to_string(),
            citations: Vec::new(),
            confidence: Confidence::Low,
            degraded: true,
        }
    }
}

/// Builds grounding prompts and obtains answers from a `Generator`
pub struct AnswerSynthesizer {
    store: Arc<PassageStore>,
    generator: Arc<dyn Generator>,
    relevance_threshold: f32,
    neighbor_window: u32,
    excerpt_chars: usize,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(
        store: Arc<PassageStore>,
        generator: Arc<dyn Generator>,
        config: &SynthesisConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            relevance_threshold: config.relevance_threshold,
            neighbor_window: config.neighbor_window,
            excerpt_chars: config.excerpt_chars,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// `High` when the top fused score exceeds the relevance threshold
    pub fn confidence(&self, fused: &FusedResult) -> Confidence {
        match fused.top_score() {
            Some(score) if score > self.relevance_threshold => Confidence::High,
            _ => Confidence::Low,
        }
    }

    /// Synthesize an answer. Fails with `SynthesisUnavailable` when the
    /// generation service errors or exceeds its timeout.
    pub async fn synthesize(&self, query: &str, fused: &FusedResult) -> Result<Answer> {
        if fused.is_empty() {
            debug!("Empty fused result, skipping generation");
            return Ok(Answer::insufficient_evidence());
        }

        let (hits, neighbors) = self.context_passages(fused);
        if hits.is_empty() {
            warn!("No fused passage is held by the store, skipping generation");
            return Ok(Answer::insufficient_evidence());
        }
        let prompt = build_prompt(query, &hits, &neighbors);

        let completion = tokio::time::timeout(self.timeout, self.generator.complete(&prompt))
            .await
            .map_err(|_| {
                AppError::synthesis_unavailable(format!(
                    "generation timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })
            .and_then(|result| result);

        let text = match completion {
            Ok(text) => {
                record_synthesis_attempt(self.model_name(), true);
                text
            }
            Err(e) => {
                record_synthesis_attempt(self.model_name(), false);
                warn!(model = %self.model_name(), error = %e, "Generation failed");
                return Err(match e {
                    AppError::SynthesisUnavailable { .. } => e,
                    e if e.is_configuration() => e,
                    other => AppError::synthesis_unavailable(other.to_string()),
                });
            }
        };

        Ok(Answer {
            answer_text: text.trim().to_string(),
            citations: hits
                .iter()
                .chain(neighbors.iter())
                .map(|p| p.id.clone())
                .collect(),
            confidence: self.confidence(fused),
            degraded: false,
        })
    }

    /// Degraded answer: the fused passages as truncated raw excerpts
    pub fn excerpt_answer(&self, fused: &FusedResult) -> Answer {
        if fused.is_empty() {
            return Answer::insufficient_evidence();
        }

        let mut text = String::from(EXCERPT_HEADER);
        let mut citations = Vec::with_capacity(fused.len());
        for hit in fused.iter() {
            let Ok(passage) = self.store.get(&hit.passage_id) else {
                continue;
            };
            let _ = write!(
                text,
                "\n[{}] {}",
                passage.position.label(),
                truncate_chars(&passage.text, self.excerpt_chars)
            );
            citations.push(passage.id.clone());
        }
        if citations.is_empty() {
            return Answer::insufficient_evidence();
        }

        Answer {
            answer_text: text,
            citations,
            confidence: self.confidence(fused),
            degraded: true,
        }
    }

    /// Fused passages in rank order plus their same-chapter neighbors.
    /// Ids the store does not hold are skipped.
    fn context_passages<'a>(
        &'a self,
        fused: &FusedResult,
    ) -> (Vec<&'a Passage>, Vec<&'a Passage>) {
        let hits: Vec<&Passage> = fused
            .iter()
            .filter_map(|hit| match self.store.get(&hit.passage_id) {
                Ok(passage) => Some(passage),
                Err(e) => {
                    warn!(error = %e, "Fused passage missing from store");
                    None
                }
            })
            .collect();

        let mut seen: HashSet<&PassageId> = hits.iter().map(|p| &p.id).collect();
        let mut neighbors = Vec::new();
        if self.neighbor_window > 0 {
            for hit in hits.iter() {
                let Ok(window) = self.store.neighbors(&hit.id, self.neighbor_window) else {
                    continue;
                };
                for neighbor in window {
                    if seen.insert(&neighbor.id) {
                        neighbors.push(neighbor);
                    }
                }
            }
        }

        (hits, neighbors)
    }
}

/// Grounding prompt: persona, instructions, question, labelled passage blocks
pub fn build_prompt(query: &str, hits: &[&Passage], neighbors: &[&Passage]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "{}{}", PERSONA, INSTRUCTIONS);
    let _ = writeln!(prompt, "\n问题：{}", query);

    let _ = writeln!(prompt, "\n## 检索到的原文");
    for passage in hits {
        write_block(&mut prompt, passage);
    }

    if !neighbors.is_empty() {
        let _ = writeln!(prompt, "\n## 相邻段落");
        for passage in neighbors {
            write_block(&mut prompt, passage);
        }
    }

    let _ = write!(prompt, "\n回答：");
    prompt
}

fn write_block(prompt: &mut String, passage: &Passage) {
    let _ = writeln!(
        prompt,
        "\n[{} | {}]\n{}",
        passage.position.label(),
        passage.id,
        passage.text.trim()
    );
}

fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
