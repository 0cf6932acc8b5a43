//! Text-completion service abstraction
//!
//! The generation model is a black box: `complete(prompt) -> text`.
//! Timeouts and retries are owned by the caller, not the provider.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for completion providers
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete a prompt. Any failure is reported as `SynthesisUnavailable`.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completions client (OpenAI, DeepSeek, local servers)
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl ChatCompletionGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "generation.api_key is required for the openai provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::synthesis_unavailable(format!("LLM API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::synthesis_unavailable(format!(
                "LLM API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::synthesis_unavailable(format!("Failed to parse LLM response: {}", e))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::synthesis_unavailable("Empty response from LLM"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline generator that answers with the opening sentence of the
/// highest-ranked context passages. Never invents text.
pub struct ExtractiveGenerator {
    max_passages: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_passages: usize) -> Self {
        Self {
            max_passages: max_passages.max(1),
        }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Label prefix of a passage block inside a grounding prompt
pub const PASSAGE_BLOCK_PREFIX: &str = "[chapter ";

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut picked = Vec::new();
        let mut lines = prompt.lines();

        while let Some(line) = lines.next() {
            if picked.len() >= self.max_passages {
                break;
            }
            let Some(label) = line
                .strip_prefix('[')
                .filter(|_| line.starts_with(PASSAGE_BLOCK_PREFIX))
                .and_then(|rest| rest.split(" | ").next())
            else {
                continue;
            };
            if let Some(body) = lines.by_ref().find(|l| !l.trim().is_empty()) {
                picked.push(format!("{}（{}）", first_sentence(body.trim()), label));
            }
        }

        if picked.is_empty() {
            return Err(AppError::synthesis_unavailable(
                "no context passages found in prompt",
            ));
        }

        Ok(format!("根据原文：{}", picked.join(" ")))
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}

fn first_sentence(text: &str) -> &str {
    match text.char_indices().find(|(_, c)| matches!(c, '。' | '！' | '？' | '!' | '?')) {
        Some((idx, c)) => &text[..idx + c.len_utf8()],
        None => text,
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(ChatCompletionGenerator::new(config)?)),
        "extractive" => Ok(Arc::new(ExtractiveGenerator::default())),
        other => Err(AppError::Configuration {
            message: format!("unknown generation provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extractive_picks_leading_sentences() {
        let prompt = "问题：谁写的？\n\n[chapter 70 ¶5 | c070_0005]\n宝钗的《临江仙》写得最好。众人拍案叫绝。\n\n[chapter 70 ¶6 | c070_0006]\n黛玉笑道：好！\n";
        let answer = ExtractiveGenerator::default().complete(prompt).await.unwrap();
        assert_eq!(
            answer,
            "根据原文：宝钗的《临江仙》写得最好。（chapter 70 ¶5） 黛玉笑道：好！（chapter 70 ¶6）"
        );
    }

    #[tokio::test]
    async fn test_extractive_without_context_is_unavailable() {
        let err = ExtractiveGenerator::default()
            .complete("no passages here")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SynthesisUnavailable { .. }));
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("甲。乙。"), "甲。");
        assert_eq!(first_sentence("no terminator"), "no terminator");
    }

    #[test]
    fn test_unknown_provider() {
        let config = GenerationConfig {
            provider: "carrier-pigeon".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
