//! Query Router - classifies a question and weights the retrievers
//!
//! Provides:
//! - Rule-based lookup / inferential classification
//! - Sparse/dense weight selection per class
//!
//! Classification is a pure function of the query text: the same text
//! always yields the same class and weights.

use crate::config::RouterConfig;
use crate::text::normalize_query;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Question class inferred by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    /// Answerable from an exact or near-exact text match
    Lookup,
    /// Needs synthesis across several passages
    Inferential,
    /// No dominant signal
    Unknown,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Lookup => "lookup",
            QueryClass::Inferential => "inferential",
            QueryClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retriever weights. `sparse + dense == 1.0` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingWeights {
    sparse: f32,
    dense: f32,
}

impl RoutingWeights {
    /// Build from the sparse share; the dense share is the complement
    pub fn from_sparse(sparse: f32) -> Self {
        let sparse = if sparse.is_nan() { 0.5 } else { sparse.clamp(0.0, 1.0) };
        Self {
            sparse,
            dense: 1.0 - sparse,
        }
    }

    pub fn balanced() -> Self {
        Self::from_sparse(0.5)
    }

    pub fn sparse(&self) -> f32 {
        self.sparse
    }

    pub fn dense(&self) -> f32 {
        self.dense
    }
}

/// Rule hits counted while classifying
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSignals {
    pub lookup: u32,
    pub inferential: u32,
}

/// A classified question. Immutable once routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Normalised query text
    pub text: String,

    pub class: QueryClass,

    pub weights: RoutingWeights,

    pub signals: RoutingSignals,
}

struct RouterPatterns {
    lookup: Vec<Regex>,
    inferential: Vec<Regex>,
}

/// Personality, trait and interpretive vocabulary
const TRAIT_KEYWORDS: &[&str] = &[
    "性格", "人品", "品格", "形象", "能力", "才干", "才华", "手腕", "理家", "管理",
    "为人", "脾气", "心理", "心态", "情感", "感情", "外貌", "风格", "特点", "特色",
    "体现", "反映", "表现", "分析", "评价", "概括", "总结", "归纳", "揭示", "刻画",
    "主题", "意义", "象征", "暗示", "隐喻", "寓意", "伏线", "命运", "推测", "影响",
    "personality", "character", "trait", "theme",
];

/// Character names and their common short forms
const CHARACTER_NAMES: &[&str] = &[
    "宝玉", "黛玉", "宝钗", "林妹妹", "宝姐姐", "王熙凤", "凤姐", "湘云", "元春", "迎春",
    "探春", "惜春", "妙玉", "可卿", "李纨", "巧姐", "晴雯", "袭人", "平儿", "鸳鸯", "紫鹃",
    "香菱", "麝月", "刘姥姥", "贾母", "王夫人", "邢夫人", "薛姨妈", "贾政", "贾赦", "贾琏",
    "贾珍", "贾蓉", "贾环", "薛蟠", "宝琴", "尤二姐", "尤三姐", "甄士隐", "贾雨村",
];

fn patterns() -> &'static RouterPatterns {
    static PATTERNS: OnceLock<RouterPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).expect("valid router pattern");
        RouterPatterns {
            lookup: [
                // Quoted titles and verbatim quotations
                r#"[《》“”"「」『』]"#,
                // Asking for an author, speaker or owner
                r"谁(写|作|题|说|给|的|送)",
                // Short interrogatives that locate something
                r"^(谁|哪(个|位|一回|里|儿|句)|第.+回|几回|何处)",
                r"(出自|原文|哪一回|哪句|是什么|叫什么)",
                r"(?i)\b(who|which chapter|where|quote)\b",
            ]
            .iter()
            .map(|p| compile(p))
            .collect(),
            inferential: [
                // Why / how
                r"(为什么|为何|如何|怎样|怎么)",
                r"(?i)\b(why|how)\b",
                // Comparison
                r"(相似|相同|相像|区别|不同|异同|比较|对比|像不像)",
                r"(?i)\b(compare|similar|difference|versus|vs)\b",
                // Multi-entity: "A和B", "A与B"
                r"[一-鿿]{2,4}(和|与|跟|同|及)[一-鿿]{2,4}",
            ]
            .iter()
            .map(|p| compile(p))
            .collect(),
        }
    })
}

/// Deterministic rule-based router
#[derive(Debug, Clone)]
pub struct QueryRouter {
    lookup_weights: RoutingWeights,
    inferential_weights: RoutingWeights,
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}

impl QueryRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            lookup_weights: RoutingWeights::from_sparse(config.lookup_sparse_weight),
            inferential_weights: RoutingWeights::from_sparse(config.inferential_sparse_weight),
        }
    }

    /// Classify a question and pick retriever weights
    pub fn classify(&self, raw: &str) -> Query {
        let text = normalize_query(raw);
        let signals = Self::count_signals(&text);

        let (class, weights) = if signals.lookup > signals.inferential {
            (QueryClass::Lookup, self.lookup_weights)
        } else if signals.inferential > signals.lookup {
            (QueryClass::Inferential, self.inferential_weights)
        } else {
            (QueryClass::Unknown, RoutingWeights::balanced())
        };

        Query {
            text,
            class,
            weights,
            signals,
        }
    }

    fn count_signals(text: &str) -> RoutingSignals {
        let patterns = patterns();
        let mut lookup = patterns.lookup.iter().filter(|re| re.is_match(text)).count() as u32;
        let mut inferential =
            patterns.inferential.iter().filter(|re| re.is_match(text)).count() as u32;

        if CHARACTER_NAMES.iter().any(|name| text.contains(name)) {
            lookup += 1;
        }

        let lower = text.to_lowercase();
        if TRAIT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            inferential += 1;
        }

        RoutingSignals {
            lookup,
            inferential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_author_question_is_lookup() {
        let router = QueryRouter::default();
        let query = router.classify("咏柳絮的《临江仙》是谁写的?");
        assert_eq!(query.class, QueryClass::Lookup);
        assert_eq!(query.weights.sparse(), 0.8);
        assert!(query.weights.sparse() > query.weights.dense());
    }

    #[test]
    fn test_character_comparison_is_inferential() {
        let router = QueryRouter::default();
        let query = router.classify("林黛玉和晴雯有相似之处吗?");
        assert_eq!(query.class, QueryClass::Inferential);
        assert!(query.weights.dense() > query.weights.sparse());
    }

    #[test]
    fn test_character_name_is_a_lookup_signal() {
        let router = QueryRouter::default();
        let query = router.classify("黛玉的丫鬟叫什么");
        assert_eq!(query.class, QueryClass::Lookup);
        assert_eq!(query.signals.lookup, 2);

        assert_eq!(router.classify("晴雯").class, QueryClass::Lookup);
        // Names count once, however many appear
        assert_eq!(router.classify("宝玉 黛玉 宝钗").signals.lookup, 1);
    }

    #[test]
    fn test_trait_question_is_inferential() {
        let router = QueryRouter::default();
        assert_eq!(
            router.classify("贾琏是一个怎样的人物形象?").class,
            QueryClass::Inferential
        );
        assert_eq!(router.classify("薛宝钗人品怎么样?").class, QueryClass::Inferential);
        assert_eq!(
            router.classify("Why did Qingwen die?").class,
            QueryClass::Inferential
        );
    }

    #[test]
    fn test_no_signal_is_unknown_and_balanced() {
        let router = QueryRouter::default();
        let query = router.classify("冷香丸");
        assert_eq!(query.class, QueryClass::Unknown);
        assert_eq!(query.weights, RoutingWeights::balanced());
        assert_eq!(query.signals, RoutingSignals::default());
    }

    #[test]
    fn test_tied_signals_default_to_unknown() {
        let router = QueryRouter::default();
        // 《》 is a lookup signal, 为什么 an inferential one
        let query = router.classify("这部书为什么叫《红楼梦》");
        assert_eq!(query.signals.lookup, query.signals.inferential);
        assert_eq!(query.class, QueryClass::Unknown);
    }

    #[test]
    fn test_weights_always_sum_to_one() {
        let router = QueryRouter::default();
        for q in [
            "咏柳絮的《临江仙》是谁写的?",
            "林黛玉和晴雯有相似之处吗?",
            "",
            "   ",
            "人造卫星有何用途?",
            "根据前 80 回的内容,推测贾府的最终命运",
        ] {
            let w = router.classify(q).weights;
            assert_eq!(w.sparse() + w.dense(), 1.0, "query {:?}", q);
        }
        for s in [0.0, 0.1, 0.2, 0.3, 0.35, 0.65, 0.7, 0.8, 1.0, -3.0, 7.0, f32::NAN] {
            let w = RoutingWeights::from_sparse(s);
            assert_eq!(w.sparse() + w.dense(), 1.0, "sparse {}", s);
        }
    }

    #[test]
    fn test_classification_is_pure() {
        let router = QueryRouter::default();
        let a = router.classify("  王熙凤  为什么不孕? ");
        let b = router.classify("王熙凤 为什么不孕?");
        assert_eq!(a, b);
        assert_eq!(a.text, "王熙凤 为什么不孕?");
    }

    #[test]
    fn test_configured_weights() {
        let router = QueryRouter::new(&RouterConfig {
            lookup_sparse_weight: 0.7,
            inferential_sparse_weight: 0.0,
        });
        assert_eq!(router.classify("《秋窗风雨夕》是谁写的?").weights.sparse(), 0.7);
        let w = router.classify("这首诗是什么样的风格?").weights;
        // 是什么 (lookup) vs 风格 (inferential) ties
        assert_eq!(w, RoutingWeights::balanced());
    }
}
