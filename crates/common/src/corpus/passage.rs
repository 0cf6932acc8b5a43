//! Passage entity: one immutable, addressable segment of the novel

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable, opaque passage identifier (e.g. `c027_0012`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PassageId(Arc<str>);

impl PassageId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PassageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PassageId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<PassageId> for String {
    fn from(value: PassageId) -> Self {
        value.0.to_string()
    }
}

/// Location of a passage in the novel.
///
/// Field order defines the corpus ordinal: earlier chapters first, then
/// earlier paragraphs within a chapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub chapter: u32,
    pub start_para: u32,
    pub end_para: u32,
}

impl SourcePosition {
    pub fn new(chapter: u32, start_para: u32, end_para: u32) -> Self {
        Self {
            chapter,
            start_para,
            end_para,
        }
    }

    /// Citation label, e.g. `chapter 27 ¶12-14`
    pub fn label(&self) -> String {
        if self.start_para == self.end_para {
            format!("chapter {} ¶{}", self.chapter, self.start_para)
        } else {
            format!("chapter {} ¶{}-{}", self.chapter, self.start_para, self.end_para)
        }
    }
}

/// Prose chunks are merged paragraphs; poems are always kept whole
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassageKind {
    Prose,
    Poem,
}

/// Immutable unit of retrievable text
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,

    pub kind: PassageKind,

    pub position: SourcePosition,

    pub text: String,

    /// Precomputed embedding from ingestion, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Model that produced `embedding`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Passage {
    /// Create a passage without a precomputed embedding
    pub fn new(id: impl AsRef<str>, position: SourcePosition, text: impl Into<String>) -> Self {
        Self {
            id: PassageId::new(id),
            kind: PassageKind::Prose,
            position,
            text: text.into(),
            embedding: None,
            embedding_model: None,
        }
    }

    pub fn with_kind(mut self, kind: PassageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_embedding(mut self, model: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embedding_model = Some(model.into());
        self.embedding = Some(embedding);
        self
    }

    /// Character count (not bytes)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// One line of the chunker's JSONL output
#[derive(Debug, Deserialize)]
pub(crate) struct PassageRecord {
    pub chunk_id: String,
    pub chapter: u32,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: PassageKind,
    pub start_para: u32,
    pub end_para: u32,
    pub text: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

fn default_kind() -> PassageKind {
    PassageKind::Prose
}

impl From<PassageRecord> for Passage {
    fn from(record: PassageRecord) -> Self {
        let position = SourcePosition::new(record.chapter, record.start_para, record.end_para);
        let mut passage =
            Passage::new(record.chunk_id, position, record.text).with_kind(record.kind);
        passage.embedding = record.embedding;
        passage.embedding_model = record.embedding_model;
        passage
    }
}
