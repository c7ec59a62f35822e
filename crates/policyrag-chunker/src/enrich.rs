//! Metadata enrichment.
//!
//! Fills the semantic fields of a chunk: clause category, entity role,
//! keywords, section id, and parent section. Classification is a rule
//! cascade, an ordered list of (keyword set, label) pairs with `General` as
//! the sink, so determinism and total coverage hold by construction.

use jieba_rs::Jieba;
use policyrag_core::{ClauseCategory, EntityRole};
use regex::Regex;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::LazyLock;

static SECTION_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)*)\s+").unwrap());

/// The category cascade, evaluated top to bottom; first hit wins.
const CATEGORY_RULES: &[(&[&str], ClauseCategory)] = &[
    (
        &["责任免除", "我们不承担", "除外", "不负责", "免除责任", "不予给付"],
        ClauseCategory::Exclusion,
    ),
    (
        &["保险责任", "我们给付", "保险金", "我们支付", "承担责任", "给付"],
        ClauseCategory::Liability,
    ),
    (
        &["本合同所称", "定义", "是指", "本条款中", "以下简称"],
        ClauseCategory::Definition,
    ),
    (
        &["申请", "理赔", "手续", "流程", "提交材料", "审核", "办理"],
        ClauseCategory::Process,
    ),
];

const INSURER_KEYWORDS: &[&str] = &["我们", "本公司", "保险人"];
const INSURED_KEYWORDS: &[&str] = &["被保险人", "受保人", "您的孩子"];
const BENEFICIARY_KEYWORDS: &[&str] = &["受益人", "继承人"];

/// Domain nouns weighted up during keyword extraction.
const DOMAIN_NOUNS: &[&str] = &[
    "保险金",
    "现金价值",
    "保险费",
    "受益人",
    "被保险人",
    "保险责任",
    "责任免除",
    "退保",
    "减额交清",
    "犹豫期",
    "宽限期",
    "保险期间",
    "年金",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上",
        "也", "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这",
        "为", "与", "或", "及", "等", "其", "中", "由", "以", "如", "但",
    ]
    .into_iter()
    .collect()
});

/// Fills category, entity role, keywords, and section ids.
pub struct MetadataEnricher {
    jieba: Jieba,
    top_k: usize,
}

impl MetadataEnricher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_top_k(5)
    }

    #[must_use]
    pub fn with_top_k(top_k: usize) -> Self {
        let mut jieba = Jieba::new();
        // Domain nouns must segment as single tokens for weighting to land.
        for noun in DOMAIN_NOUNS {
            jieba.add_word(noun, None, None);
        }
        Self { jieba, top_k }
    }

    /// Classify the clause category. Total: falls through to `General`.
    #[must_use]
    pub fn classify_category(&self, content: &str) -> ClauseCategory {
        for (keywords, category) in CATEGORY_RULES {
            if keywords.iter().any(|kw| content.contains(kw)) {
                return *category;
            }
        }
        ClauseCategory::General
    }

    /// Identify the dominant entity role by keyword occurrence count. The
    /// role must have a strictly largest count; ties and all-zero yield none.
    #[must_use]
    pub fn identify_entity_role(&self, content: &str) -> Option<EntityRole> {
        let count = |keywords: &[&str]| -> usize {
            keywords.iter().map(|kw| content.matches(kw).count()).sum()
        };
        let insurer = count(INSURER_KEYWORDS);
        let insured = count(INSURED_KEYWORDS);
        let beneficiary = count(BENEFICIARY_KEYWORDS);

        let max = insurer.max(insured).max(beneficiary);
        if max == 0 {
            return None;
        }
        let winners = [insurer, insured, beneficiary]
            .iter()
            .filter(|&&c| c == max)
            .count();
        if winners > 1 {
            return None;
        }
        if insurer == max {
            Some(EntityRole::Insurer)
        } else if insured == max {
            Some(EntityRole::Insured)
        } else {
            Some(EntityRole::Beneficiary)
        }
    }

    /// Top-k keywords by term frequency within the chunk, domain nouns
    /// weighted up, stop list applied.
    #[must_use]
    pub fn extract_keywords(&self, content: &str) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in self.jieba.cut(content, false) {
            if token.chars().count() < 2 || STOPWORDS.contains(token) {
                continue;
            }
            if token.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace()) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }
        for noun in DOMAIN_NOUNS {
            if let Some(count) = counts.get_mut(noun) {
                *count *= 2;
            }
        }

        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        // Count first, then lexicographic for a stable order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(self.top_k)
            .map(|(token, _)| token.to_string())
            .collect()
    }

    /// Parse a leading dotted-numeric id from a heading, e.g.
    /// "### 1.2.6 身故保险金" → "1.2.6".
    #[must_use]
    pub fn extract_section_id(&self, heading: &str) -> Option<String> {
        let stripped = heading.trim_start_matches('#').trim();
        SECTION_ID
            .captures(stripped)
            .map(|caps| caps[1].to_string())
    }

    /// The id minus its last segment, e.g. "1.2.6" → "1.2".
    #[must_use]
    pub fn parent_section(&self, section_id: &str) -> Option<String> {
        let parts: Vec<&str> = section_id.split('.').collect();
        if parts.len() <= 1 {
            return None;
        }
        Some(parts[..parts.len() - 1].join("."))
    }
}

impl Default for MetadataEnricher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enricher() -> MetadataEnricher {
        MetadataEnricher::new()
    }

    // ==================== Category cascade ====================

    #[test]
    fn test_exclusion_beats_liability() {
        // Contains both exclusion and liability markers; the cascade order
        // makes exclusion win.
        let content = "责任免除：下列情形我们不承担给付保险金的责任。";
        assert_eq!(enricher().classify_category(content), ClauseCategory::Exclusion);
    }

    #[test]
    fn test_liability() {
        let content = "我们给付身故保险金，按基本保险金额的百分之一百六十确定。";
        assert_eq!(enricher().classify_category(content), ClauseCategory::Liability);
    }

    #[test]
    fn test_definition_before_process() {
        let content = "本合同所称申请人，是指提出申请的个人。";
        assert_eq!(enricher().classify_category(content), ClauseCategory::Definition);
    }

    #[test]
    fn test_process() {
        let content = "申请领取时，请提交材料并办理相关手续。";
        assert_eq!(enricher().classify_category(content), ClauseCategory::Process);
    }

    #[test]
    fn test_general_sink() {
        assert_eq!(
            enricher().classify_category("本合同自双方签章次日生效。"),
            ClauseCategory::General
        );
        assert_eq!(enricher().classify_category(""), ClauseCategory::General);
    }

    // ==================== Entity role ====================

    #[test]
    fn test_insurer_majority() {
        let content = "我们在收到申请后，我们将在五日内作出核定，本公司承担给付责任。";
        assert_eq!(enricher().identify_entity_role(content), Some(EntityRole::Insurer));
    }

    #[test]
    fn test_beneficiary_majority() {
        let content = "受益人由被保险人指定；受益人为数人时，受益人按份额领取。";
        assert_eq!(
            enricher().identify_entity_role(content),
            Some(EntityRole::Beneficiary)
        );
    }

    #[test]
    fn test_tie_yields_none() {
        let content = "我们与被保险人另有约定。";
        assert_eq!(enricher().identify_entity_role(content), None);
    }

    #[test]
    fn test_all_zero_yields_none() {
        assert_eq!(enricher().identify_entity_role("纯粹的程序性说明。"), None);
    }

    // ==================== Keywords ====================

    #[test]
    fn test_keywords_top_k_and_stoplist() {
        let enricher = MetadataEnricher::with_top_k(3);
        let content = "保险金的给付：我们给付保险金，保险金按照现金价值确定，现金价值逐年增加。";
        let keywords = enricher.extract_keywords(content);
        assert_eq!(keywords.len(), 3);
        assert!(keywords.contains(&"保险金".to_string()));
        assert!(!keywords.iter().any(|k| k == "的"));
    }

    #[test]
    fn test_keywords_domain_weighting() {
        // 现金价值 appears once, 增加 twice; the domain weight doubles the
        // former so it must rank in the top two.
        let content = "现金价值将增加，增加幅度见附表。";
        let keywords = enricher().extract_keywords(content);
        assert!(keywords
            .iter()
            .position(|k| k == "现金价值")
            .is_some_and(|pos| pos < 2));
    }

    #[test]
    fn test_keywords_empty_content() {
        assert!(enricher().extract_keywords("").is_empty());
    }

    // ==================== Section ids ====================

    #[test]
    fn test_extract_section_id() {
        let enricher = enricher();
        assert_eq!(
            enricher.extract_section_id("### 1.2.6 身故保险金"),
            Some("1.2.6".to_string())
        );
        assert_eq!(enricher.extract_section_id("1.4 保险期间"), Some("1.4".to_string()));
        assert_eq!(enricher.extract_section_id("保险责任"), None);
    }

    #[test]
    fn test_parent_section() {
        let enricher = enricher();
        assert_eq!(enricher.parent_section("1.2.6"), Some("1.2".to_string()));
        assert_eq!(enricher.parent_section("5.2"), Some("5".to_string()));
        assert_eq!(enricher.parent_section("3"), None);
    }
}
