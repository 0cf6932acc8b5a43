//! Result fusion: merge sparse and dense candidates into one ranked list
//!
//! Two strategies:
//! - Weighted score: min-max normalise each retriever's scores to [0, 1],
//!   then combine with the routing weights. A retriever that returned
//!   nothing for a passage contributes 0.
//! - Reciprocal rank: `w * (k + 1) / (k + rank)` summed over retrievers,
//!   so a passage ranked first by both retrievers scores 1.0.
//!
//! Output contains each passage at most once, is sorted by fused score
//! (ties by corpus position, then id) and holds at most `k` entries.

use super::{Candidate, RetrieverKind};
use redchamber_common::config::FusionConfig;
use redchamber_common::context::RoutingWeights;
use redchamber_common::corpus::{PassageId, SourcePosition};
use redchamber_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fusion strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionStrategy {
    /// Weighted sum of min-max normalised scores
    WeightedScore,
    /// Weighted reciprocal rank fusion with constant `k`
    ReciprocalRank { k: f32 },
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::WeightedScore => "weighted",
            FusionStrategy::ReciprocalRank { .. } => "rrf",
        }
    }
}

/// One passage in the fused list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedPassage {
    pub passage_id: PassageId,

    pub position: SourcePosition,

    /// Fused score within [0, 1]
    pub score: f32,

    /// Retrievers that returned this passage, sparse first
    pub sources: Vec<RetrieverKind>,

    /// Normalised sparse contribution before weighting, if any
    pub sparse_score: Option<f32>,

    /// Normalised dense contribution before weighting, if any
    pub dense_score: Option<f32>,
}

/// Ordered, deduplicated fusion output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub passages: Vec<FusedPassage>,
}

impl FusedResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Highest fused score, `None` when empty
    pub fn top_score(&self) -> Option<f32> {
        self.passages.first().map(|p| p.score)
    }

    /// Passage ids in fused order
    pub fn ids(&self) -> Vec<PassageId> {
        self.passages.iter().map(|p| p.passage_id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FusedPassage> {
        self.passages.iter()
    }
}

/// Merges the two candidate lists under routing weights
#[derive(Debug, Clone)]
pub struct ResultFusion {
    strategy: FusionStrategy,
}

impl Default for ResultFusion {
    fn default() -> Self {
        Self::new(FusionStrategy::WeightedScore)
    }
}

impl ResultFusion {
    pub fn new(strategy: FusionStrategy) -> Self {
        Self { strategy }
    }

    /// Pick the strategy named in configuration
    pub fn from_config(config: &FusionConfig) -> Result<Self> {
        let strategy = match config.strategy.as_str() {
            "weighted" => FusionStrategy::WeightedScore,
            "rrf" => FusionStrategy::ReciprocalRank { k: config.rrf_k },
            other => {
                return Err(AppError::Configuration {
                    message: format!("unknown fusion strategy '{}'", other),
                })
            }
        };
        Ok(Self::new(strategy))
    }

    pub fn strategy(&self) -> FusionStrategy {
        self.strategy
    }

    /// Fuse candidate lists. Pass an empty slice for a retriever that failed.
    pub fn fuse(
        &self,
        sparse: &[Candidate],
        dense: &[Candidate],
        weights: RoutingWeights,
        k: usize,
    ) -> FusedResult {
        let (sparse_norm, dense_norm) = match self.strategy {
            FusionStrategy::WeightedScore => (min_max(sparse), min_max(dense)),
            FusionStrategy::ReciprocalRank { k: rrf_k } => {
                (reciprocal_rank(sparse, rrf_k), reciprocal_rank(dense, rrf_k))
            }
        };

        let mut merged: HashMap<PassageId, FusedPassage> = HashMap::new();
        for (candidate, norm) in sparse.iter().zip(sparse_norm) {
            let entry = merged
                .entry(candidate.passage_id.clone())
                .or_insert_with(|| empty_entry(candidate));
            entry.sparse_score = Some(entry.sparse_score.map_or(norm, |s| s.max(norm)));
        }
        for (candidate, norm) in dense.iter().zip(dense_norm) {
            let entry = merged
                .entry(candidate.passage_id.clone())
                .or_insert_with(|| empty_entry(candidate));
            entry.dense_score = Some(entry.dense_score.map_or(norm, |s| s.max(norm)));
        }

        let mut passages: Vec<FusedPassage> = merged
            .into_values()
            .map(|mut p| {
                p.score = weights.sparse() * p.sparse_score.unwrap_or(0.0)
                    + weights.dense() * p.dense_score.unwrap_or(0.0);
                if p.sparse_score.is_some() {
                    p.sources.push(RetrieverKind::Sparse);
                }
                if p.dense_score.is_some() {
                    p.sources.push(RetrieverKind::Dense);
                }
                p
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| a.passage_id.cmp(&b.passage_id))
        });
        passages.truncate(k);

        FusedResult { passages }
    }
}

fn empty_entry(candidate: &Candidate) -> FusedPassage {
    FusedPassage {
        passage_id: candidate.passage_id.clone(),
        position: candidate.position,
        score: 0.0,
        sources: Vec::with_capacity(2),
        sparse_score: None,
        dense_score: None,
    }
}

/// Min-max normalise; a single candidate or identical scores map to 1.0
fn min_max(candidates: &[Candidate]) -> Vec<f32> {
    let (min, max) = candidates
        .iter()
        .map(|c| c.score)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s), hi.max(s))
        });
    let range = max - min;

    candidates
        .iter()
        .map(|c| {
            if range > f32::EPSILON {
                ((c.score - min) / range).clamp(0.0, 1.0)
            } else {
                1.0
            }
        })
        .collect()
}

/// `(k + 1) / (k + rank)` with 1-based ranks over the list as given
fn reciprocal_rank(candidates: &[Candidate], k: f32) -> Vec<f32> {
    (1..=candidates.len())
        .map(|rank| (k + 1.0) / (k + rank as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, chapter: u32, source: RetrieverKind, score: f32) -> Candidate {
        Candidate {
            passage_id: PassageId::new(id),
            position: SourcePosition::new(chapter, 1, 1),
            source,
            score,
        }
    }

    fn sparse(items: &[(&str, u32, f32)]) -> Vec<Candidate> {
        items
            .iter()
            .map(|&(id, ch, s)| candidate(id, ch, RetrieverKind::Sparse, s))
            .collect()
    }

    fn dense(items: &[(&str, u32, f32)]) -> Vec<Candidate> {
        items
            .iter()
            .map(|&(id, ch, s)| candidate(id, ch, RetrieverKind::Dense, s))
            .collect()
    }

    #[test]
    fn test_overlap_is_deduplicated_with_both_sources() {
        let fusion = ResultFusion::default();
        let s = sparse(&[("a", 1, 12.0), ("b", 2, 6.0)]);
        let d = dense(&[("b", 2, 0.9), ("c", 3, 0.4)]);

        let fused = fusion.fuse(&s, &d, RoutingWeights::balanced(), 10);
        assert_eq!(fused.len(), 3);

        let b = fused.iter().find(|p| p.passage_id.as_str() == "b").unwrap();
        assert_eq!(b.sources, vec![RetrieverKind::Sparse, RetrieverKind::Dense]);
        assert_eq!(b.sparse_score, Some(0.0));
        assert_eq!(b.dense_score, Some(1.0));

        let mut ids = fused.ids();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_weights_decide_order() {
        let fusion = ResultFusion::default();
        let s = sparse(&[("lexical", 70, 9.0), ("other", 5, 1.0)]);
        let d = dense(&[("semantic", 77, 0.8), ("other", 5, 0.2)]);

        let lookup = fusion.fuse(&s, &d, RoutingWeights::from_sparse(0.8), 10);
        assert_eq!(lookup.passages[0].passage_id.as_str(), "lexical");

        let inferential = fusion.fuse(&s, &d, RoutingWeights::from_sparse(0.2), 10);
        assert_eq!(inferential.passages[0].passage_id.as_str(), "semantic");
    }

    #[test]
    fn test_truncates_to_k_and_sorts() {
        let fusion = ResultFusion::default();
        let s = sparse(&[("a", 1, 5.0), ("b", 2, 4.0), ("c", 3, 3.0), ("d", 4, 2.0)]);
        let fused = fusion.fuse(&s, &[], RoutingWeights::balanced(), 2);
        assert_eq!(fused.len(), 2);
        assert!(fused.passages.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(fused.iter().all(|p| (0.0..=1.0).contains(&p.score)));
    }

    #[test]
    fn test_single_candidate_normalises_to_one() {
        let fusion = ResultFusion::default();
        let fused = fusion.fuse(
            &sparse(&[("only", 1, 3.7)]),
            &[],
            RoutingWeights::from_sparse(0.8),
            5,
        );
        assert_eq!(fused.passages[0].sparse_score, Some(1.0));
        assert!((fused.top_score().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_by_position() {
        let fusion = ResultFusion::default();
        let s = sparse(&[("late", 40, 1.0), ("early", 3, 1.0)]);
        let fused = fusion.fuse(&s, &[], RoutingWeights::balanced(), 5);
        assert_eq!(fused.passages[0].passage_id.as_str(), "early");
    }

    #[test]
    fn test_raising_a_score_never_lowers_score_or_rank() {
        let fusion = ResultFusion::default();
        let d = dense(&[("a", 1, 0.5), ("b", 2, 0.7)]);
        let before = fusion.fuse(
            &sparse(&[("a", 1, 2.0), ("b", 2, 4.0), ("c", 3, 8.0)]),
            &d,
            RoutingWeights::balanced(),
            10,
        );
        let after = fusion.fuse(
            &sparse(&[("a", 1, 8.0), ("b", 2, 4.0), ("c", 3, 8.0)]),
            &d,
            RoutingWeights::balanced(),
            10,
        );
        let score = |r: &FusedResult| {
            r.iter()
                .find(|p| p.passage_id.as_str() == "a")
                .map(|p| p.score)
                .unwrap()
        };
        let rank = |r: &FusedResult| {
            r.passages
                .iter()
                .position(|p| p.passage_id.as_str() == "a")
                .unwrap()
        };
        assert!(score(&after) >= score(&before));
        assert!(rank(&after) <= rank(&before));
    }

    #[test]
    fn test_fusion_is_idempotent() {
        let fusion = ResultFusion::default();
        let s = sparse(&[("a", 1, 3.0), ("b", 2, 2.0)]);
        let d = dense(&[("b", 2, 0.3), ("c", 3, 0.1)]);
        let w = RoutingWeights::from_sparse(0.2);
        assert_eq!(fusion.fuse(&s, &d, w, 4), fusion.fuse(&s, &d, w, 4));
    }

    #[test]
    fn test_both_empty_is_empty() {
        let fused = ResultFusion::default().fuse(&[], &[], RoutingWeights::balanced(), 6);
        assert!(fused.is_empty());
        assert_eq!(fused.top_score(), None);
    }

    #[test]
    fn test_reciprocal_rank_strategy() {
        let fusion = ResultFusion::new(FusionStrategy::ReciprocalRank { k: 60.0 });
        let s = sparse(&[("a", 1, 10.0), ("b", 2, 5.0)]);
        let d = dense(&[("b", 2, 0.9), ("a", 1, 0.1)]);
        let fused = fusion.fuse(&s, &d, RoutingWeights::balanced(), 10);
        // Symmetric ranks: equal scores, position breaks the tie
        assert_eq!(fused.passages[0].passage_id.as_str(), "a");
        assert!((fused.passages[0].score - fused.passages[1].score).abs() < 1e-6);
        assert!(fused.iter().all(|p| p.score > 0.0 && p.score <= 1.0));

        let top = fusion.fuse(&s, &s, RoutingWeights::from_sparse(0.8), 1);
        assert!((top.top_score().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_strategy_from_config() {
        let rrf = ResultFusion::from_config(&FusionConfig {
            strategy: "rrf".to_string(),
            rrf_k: 30.0,
        })
        .unwrap();
        assert_eq!(rrf.strategy(), FusionStrategy::ReciprocalRank { k: 30.0 });

        let err = ResultFusion::from_config(&FusionConfig {
            strategy: "borda".to_string(),
            rrf_k: 60.0,
        })
        .unwrap_err();
        assert!(err.is_configuration());
    }
}
