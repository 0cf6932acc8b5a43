//! PassageStore: the read-only corpus shared by every request
//!
//! Provides:
//! - JSONL loading of chunker output
//! - Lookup by identifier
//! - Same-chapter neighbor lookup for context expansion
//! - A content digest identifying the loaded corpus

mod passage;

pub use passage::{Passage, PassageId, PassageKind, SourcePosition};

use crate::errors::{AppError, Result};
use passage::PassageRecord;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::info;

static GLOBAL_STORE: OnceLock<Arc<PassageStore>> = OnceLock::new();

/// Immutable passage collection.
///
/// Built once at startup and never mutated, so any number of concurrent
/// readers may share it without locking.
#[derive(Debug)]
pub struct PassageStore {
    passages: Vec<Passage>,
    by_id: HashMap<PassageId, usize>,
    /// chapter -> passage indices sorted by position
    by_chapter: BTreeMap<u32, Vec<usize>>,
    content_hash: String,
}

impl PassageStore {
    /// Build a store, rejecting duplicate identifiers
    pub fn from_passages(passages: Vec<Passage>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(passages.len());
        let mut by_chapter: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut hasher = Sha256::new();

        for (idx, passage) in passages.iter().enumerate() {
            if by_id.insert(passage.id.clone(), idx).is_some() {
                return Err(AppError::DuplicatePassage {
                    id: passage.id.to_string(),
                });
            }
            by_chapter.entry(passage.position.chapter).or_default().push(idx);

            hasher.update(passage.id.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(passage.text.as_bytes());
            hasher.update([0u8]);
        }

        for indices in by_chapter.values_mut() {
            indices.sort_by_key(|&i| passages[i].position);
        }

        Ok(Self {
            passages,
            by_id,
            by_chapter,
            content_hash: hex::encode(hasher.finalize()),
        })
    }

    /// Parse chunker JSONL output; blank lines are skipped
    pub fn from_jsonl_str(input: &str) -> Result<Self> {
        let mut passages = Vec::new();
        for (line_no, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: PassageRecord =
                serde_json::from_str(line).map_err(|e| AppError::CorpusLoad {
                    line: line_no + 1,
                    message: e.to_string(),
                })?;
            passages.push(Passage::from(record));
        }
        Self::from_passages(passages)
    }

    /// Load the corpus from a JSONL file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::CorpusLoad {
                line: 0,
                message: format!("{}: {}", path.display(), e),
            })?;
        let store = Self::from_jsonl_str(&raw)?;
        info!(
            path = %path.display(),
            passages = store.len(),
            chapters = store.by_chapter.len(),
            content_hash = %store.content_hash,
            "Corpus loaded"
        );
        Ok(store)
    }

    /// Install as the process-wide store. Only the first call succeeds.
    pub fn install(self) -> Result<Arc<PassageStore>> {
        let store = Arc::new(self);
        GLOBAL_STORE
            .set(store.clone())
            .map_err(|_| AppError::Configuration {
                message: "passage store already initialised".to_string(),
            })?;
        Ok(store)
    }

    pub fn get(&self, id: &PassageId) -> Result<&Passage> {
        self.by_id
            .get(id)
            .map(|&idx| &self.passages[idx])
            .ok_or_else(|| AppError::PassageNotFound { id: id.to_string() })
    }

    /// Every passage in load order (index-build time only)
    pub fn all(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Passages in the same chapter whose paragraph span lies within
    /// `window` paragraphs of `id`'s span, excluding `id` itself.
    pub fn neighbors(&self, id: &PassageId, window: u32) -> Result<Vec<&Passage>> {
        let anchor = self.get(id)?;
        if window == 0 {
            return Ok(Vec::new());
        }

        let lo = anchor.position.start_para.saturating_sub(window);
        let hi = anchor.position.end_para.saturating_add(window);

        let neighbors: Vec<&Passage> = self
            .by_chapter
            .get(&anchor.position.chapter)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &self.passages[i])
                    .filter(|p| p.id != anchor.id)
                    .filter(|p| p.position.start_para >= lo && p.position.end_para <= hi)
                    .collect()
            })
            .unwrap_or_default();

        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> PassageStore {
        PassageStore::from_passages(vec![
            Passage::new("c003_0001", SourcePosition::new(3, 1, 3), "黛玉方进入房时"),
            Passage::new("c003_0002", SourcePosition::new(3, 4, 6), "两弯似蹙非蹙罥烟眉"),
            Passage::new("c003_0003", SourcePosition::new(3, 7, 8), "心较比干多一窍"),
            Passage::new("c003_0004", SourcePosition::new(3, 12, 13), "宝玉看罢"),
            Passage::new("c004_0001", SourcePosition::new(4, 1, 2), "如今且说雨村"),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = PassageStore::from_passages(vec![
            Passage::new("c001_0001", SourcePosition::new(1, 1, 1), "甲"),
            Passage::new("c001_0001", SourcePosition::new(1, 2, 2), "乙"),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::DuplicatePassage { .. }));
    }

    #[test]
    fn test_get_and_missing() {
        let store = sample_store();
        assert_eq!(store.len(), 5);
        let passage = store.get(&PassageId::new("c003_0002")).unwrap();
        assert_eq!(passage.position.start_para, 4);
        assert!(store.get(&PassageId::new("c999_0001")).is_err());
    }

    #[test]
    fn test_neighbors_stay_in_chapter_and_window() {
        let store = sample_store();
        let ids: Vec<&str> = store
            .neighbors(&PassageId::new("c003_0002"), 2)
            .unwrap()
            .into_iter()
            .map(|p| p.id.as_str())
            .collect();
        // ¶2..=8 window: c003_0001 starts at 1 so it is excluded
        assert_eq!(ids, vec!["c003_0003"]);

        let wide: Vec<&str> = store
            .neighbors(&PassageId::new("c003_0002"), 7)
            .unwrap()
            .into_iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(wide, vec!["c003_0001", "c003_0003", "c003_0004"]);

        assert!(store.neighbors(&PassageId::new("c003_0002"), 0).unwrap().is_empty());
    }

    #[test]
    fn test_jsonl_parsing_and_hash() {
        let raw = concat!(
            r#"{"chunk_id":"c001_0001","chapter":1,"type":"prose","start_para":1,"end_para":2,"text":"此开卷第一回也"}"#,
            "\n\n",
            r#"{"chunk_id":"c001_0002","chapter":1,"type":"poem","start_para":3,"end_para":3,"text":"满纸荒唐言"}"#,
            "\n"
        );
        let store = PassageStore::from_jsonl_str(raw).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.content_hash().len(), 64);

        let same = PassageStore::from_jsonl_str(raw).unwrap();
        assert_eq!(store.content_hash(), same.content_hash());
    }

    #[test]
    fn test_jsonl_reports_bad_line() {
        let raw = "{\"chunk_id\":\"c001_0001\",\"chapter\":1,\"start_para\":1,\"end_para\":1,\"text\":\"甲\"}\nnot json\n";
        match PassageStore::from_jsonl_str(raw) {
            Err(AppError::CorpusLoad { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corpus load error, got {:?}", other),
        }
    }

    #[test]
    fn test_install_succeeds_once() {
        let store = tokio_test::assert_ok!(sample_store().install());
        assert_eq!(store.len(), 5);

        let err = tokio_test::assert_err!(sample_store().install());
        assert!(err.is_configuration());
    }
}
