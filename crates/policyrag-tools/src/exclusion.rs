//! `check_exclusion_risk`: exclusion-focused scenario check.

use policyrag_core::{ClauseCategory, Result, SearchFilters};
use policyrag_retriever::RetrievalRequest;
use tracing::debug;

use crate::types::{CheckExclusionRiskParams, ClauseResult, ExclusionRiskResult};
use crate::PolicyTools;

/// Fixed reference-only notice. Mandatory on every result.
pub const EXCLUSION_DISCLAIMER: &str =
    "本工具仅提供条款检索辅助，不构成理赔承诺。具体理赔结论以保险合同和保险公司审核为准。";

/// Recall floor for clauses listed at all (strict mode).
const RECALL_FLOOR: f32 = 0.65;

/// Curated scenario → exclusion-vocabulary expansion map.
const KEYWORD_EXPANSION: &[(&str, &[&str])] = &[
    ("酒驾", &["酒后驾驶", "饮酒", "醉酒", "酒精"]),
    ("吸毒", &["毒品", "注射毒品", "管制药物"]),
    ("犯罪", &["违法", "犯罪行为", "被逮捕", "刑事"]),
    ("自杀", &["自致伤害", "自杀", "故意自伤"]),
    ("既往症", &["从前", "曾经", "过去", "病史", "先天性"]),
    ("无证驾驶", &["无合法有效驾驶证", "无有效驾驶证", "驾驶证有效期已届满"]),
    ("战争", &["战争", "军事冲突", "暴乱", "武装叛乱"]),
    ("核", &["核爆炸", "核辐射", "核污染"]),
];

impl PolicyTools {
    pub(crate) async fn check_exclusion_risk(
        &self,
        params: CheckExclusionRiskParams,
    ) -> Result<ExclusionRiskResult> {
        // 1. Expand scenario keywords into the vocabulary exclusion clauses
        // actually use ("酒驾" never appears verbatim in a contract).
        let expanded = expand_scenario(&params.scenario_description);
        debug!(query = %expanded, "exclusion check");

        // 2. Retrieval forced to Exclusion category.
        let filters = SearchFilters {
            product_code: params.product_code.clone(),
            category: Some(ClauseCategory::Exclusion),
            ..Default::default()
        };
        let floor = if params.strict { RECALL_FLOOR } else { -1.0 };
        let request = RetrievalRequest::new(expanded, 10)
            .with_filters(filters)
            .with_min_similarity(floor);
        let outcome = self.retriever().search(&request).await?;

        // 3. Risk is flagged only past the stricter floor.
        let risk_floor = self.retriever().config().exclusion_min_similarity;
        let mut relevant_clauses: Vec<ClauseResult> = Vec::new();
        let mut risk_detected = false;
        for retrieved in &outcome.chunks {
            let similarity = retrieved.similarity.unwrap_or(0.0);
            if similarity >= risk_floor {
                risk_detected = true;
            }
            relevant_clauses.push(ClauseResult {
                chunk_id: retrieved.chunk.id.clone(),
                content: retrieved.chunk.content.clone(),
                section_id: retrieved.chunk.section_id.clone(),
                section_title: retrieved.chunk.section_title.clone(),
                similarity_score: similarity.max(0.0),
                source_reference: self.source_ref(&retrieved.chunk).await?,
            });
        }

        let mut summary = if relevant_clauses.is_empty() {
            "未发现直接相关的免责条款。".to_string()
        } else if risk_detected {
            format!(
                "检测到高风险免责条款。该场景可能触及以下 {} 条免责内容，请逐条核对。",
                relevant_clauses.len()
            )
        } else {
            format!(
                "发现 {} 条可能相关的免责条款，建议人工核实。",
                relevant_clauses.len()
            )
        };
        if let Some(marker) = outcome.degraded {
            summary.push_str(&format!("（检索降级：{marker}）"));
        }

        Ok(ExclusionRiskResult {
            risk_detected,
            relevant_clauses,
            summary,
            disclaimer: EXCLUSION_DISCLAIMER.to_string(),
        })
    }
}

/// Append expansion vocabulary for every scenario keyword present.
fn expand_scenario(scenario: &str) -> String {
    let mut expanded = scenario.to_string();
    for (key, expansions) in KEYWORD_EXPANSION {
        if scenario.contains(key) {
            for term in *expansions {
                expanded.push(' ');
                expanded.push_str(term);
            }
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fuyao_corpus;

    fn params(scenario: &str) -> CheckExclusionRiskParams {
        CheckExclusionRiskParams {
            scenario_description: scenario.to_string(),
            product_code: None,
            strict: false,
        }
    }

    #[test]
    fn test_expand_scenario() {
        let expanded = expand_scenario("酒驾出事");
        assert!(expanded.contains("酒后驾驶"));
        assert!(expanded.contains("醉酒"));
        // Unrelated vocabularies stay out.
        assert!(!expanded.contains("核辐射"));
    }

    #[test]
    fn test_expand_scenario_no_hit_is_identity() {
        assert_eq!(expand_scenario("台风损失"), "台风损失");
    }

    #[tokio::test]
    async fn test_drunk_driving_scenario() {
        let corpus = fuyao_corpus().await;
        let result = corpus
            .tools
            .check_exclusion_risk(params("酒驾出事"))
            .await
            .unwrap();

        // Every surfaced clause is an exclusion clause; 2.1.3 is present.
        assert!(!result.relevant_clauses.is_empty());
        assert!(result
            .relevant_clauses
            .iter()
            .any(|c| c.section_id.as_deref() == Some("2.1.3")));
        for clause in &result.relevant_clauses {
            assert!(clause.content.contains("责任免除") || clause.content.contains("不承担"));
        }
        assert_eq!(result.disclaimer, EXCLUSION_DISCLAIMER);
    }

    #[tokio::test]
    async fn test_unrelated_scenario_reports_no_risk() {
        let corpus = fuyao_corpus().await;
        let mut p = params("正常到期领取年金");
        p.strict = true;
        let result = corpus.tools.check_exclusion_risk(p).await.unwrap();
        assert!(!result.risk_detected);
        assert!(!result.disclaimer.is_empty());
        assert!(!result.summary.is_empty());
    }

    #[tokio::test]
    async fn test_strict_mode_prunes_weak_matches() {
        let corpus = fuyao_corpus().await;
        let mut p = params("酒驾出事");
        p.strict = true;
        let strict = corpus.tools.check_exclusion_risk(p).await.unwrap();

        let loose = corpus
            .tools
            .check_exclusion_risk(params("酒驾出事"))
            .await
            .unwrap();
        assert!(strict.relevant_clauses.len() <= loose.relevant_clauses.len());
    }
}
