//! `calculate_surrender_value_logic`: surrender / reduced-paid-up rules.
//!
//! Extracts the contract's own wording (definition, calculation basis,
//! preconditions, consequences) and points at the cash-value sidecar
//! tables. No amounts are computed; the tool returns the basis for
//! computing them.

use policyrag_core::{ClauseCategory, Result, SearchFilters, SourceRef, ToolError};
use policyrag_retriever::{RetrievalOutcome, RetrievalRequest};
use uuid::Uuid;

use crate::types::{SurrenderLogicParams, SurrenderLogicResult, SurrenderOperation};
use crate::PolicyTools;

/// Fixed comparison template (surrender vs reduced paid-up).
pub const COMPARISON_NOTE: &str = "退保将解除合同并退还现金价值，保障随之终止；减额交清以现金价值作为一次交清的保险费，降低基本保险金额但合同继续有效。两者都以保单现金价值为基础，请结合现金价值表比较。";

/// Inserted into calculation_rules when no cash-value table is referenced.
const SCHEDULE_NOTE: &str = "条款未引用现金价值表，具体数值请查阅保险单所附的现金价值表。";

impl PolicyTools {
    pub(crate) async fn calculate_surrender_value_logic(
        &self,
        params: SurrenderLogicParams,
    ) -> Result<SurrenderLogicResult> {
        // The tool requires a known product.
        if self
            .catalog()
            .get_product_by_code(&params.product_code)
            .await?
            .is_none()
        {
            return Err(ToolError::NotFound(format!(
                "product_code={}",
                params.product_code
            ))
            .into());
        }

        // Two Process-scoped retrievals, one per operation.
        let surrender = self
            .operation_search(&params.product_code, "解除合同 退保 退保金 现金价值")
            .await?;
        let reduced = self
            .operation_search(&params.product_code, "减额交清 交清保险费 现金价值")
            .await?;

        let primary = match params.operation {
            SurrenderOperation::Surrender => &surrender,
            SurrenderOperation::ReducedPaidUp => &reduced,
        };

        let definition = primary
            .chunks
            .first()
            .map(|r| r.chunk.content.clone())
            .unwrap_or_default();

        // Sentence-level extraction from the operation's own clauses.
        let sentences: Vec<String> = primary
            .chunks
            .iter()
            .flat_map(|r| split_sentences(&r.chunk.content))
            .collect();
        let mut calculation_rules = pick(&sentences, &["现金价值", "退保金", "保险费"]);
        let conditions = pick(&sentences, &["申请", "犹豫期", "有效期", "可以"]);
        let consequences = pick(&sentences, &["终止", "失效", "降低", "继续有效"]);

        // Rate-table references from both sides.
        let mut related_tables: Vec<Uuid> = Vec::new();
        for outcome in [&surrender, &reduced] {
            for retrieved in &outcome.chunks {
                for uuid in &retrieved.chunk.table_refs {
                    if !related_tables.contains(uuid) {
                        related_tables.push(*uuid);
                    }
                }
            }
        }
        if related_tables.is_empty() {
            calculation_rules.push(SCHEDULE_NOTE.to_string());
        }

        let mut source_references: Vec<SourceRef> = Vec::new();
        for outcome in [&surrender, &reduced] {
            for retrieved in &outcome.chunks {
                let source = self.source_ref(&retrieved.chunk).await?;
                if !source_references.contains(&source) {
                    source_references.push(source);
                }
            }
        }

        Ok(SurrenderLogicResult {
            operation_name: params.operation.label().to_string(),
            definition,
            calculation_rules,
            conditions,
            consequences,
            related_tables,
            comparison_note: COMPARISON_NOTE.to_string(),
            source_references,
        })
    }

    async fn operation_search(
        &self,
        product_code: &str,
        query: &str,
    ) -> Result<RetrievalOutcome> {
        let filters = SearchFilters {
            product_code: Some(product_code.to_string()),
            category: Some(ClauseCategory::Process),
            ..Default::default()
        };
        let request = RetrievalRequest::new(query, 3)
            .with_filters(filters)
            .with_min_similarity(-1.0);
        self.retriever().search(&request).await
    }
}

/// Split on Chinese sentence terminators, keeping non-trivial sentences.
fn split_sentences(text: &str) -> Vec<String> {
    text.split(['。', '；', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().count() >= 6 && !s.starts_with("[section:"))
        .map(|s| format!("{s}。"))
        .collect()
}

/// Sentences containing any of the markers, deduplicated in order.
fn pick(sentences: &[String], markers: &[&str]) -> Vec<String> {
    let mut picked = Vec::new();
    for sentence in sentences {
        if markers.iter().any(|m| sentence.contains(m)) && !picked.contains(sentence) {
            picked.push(sentence.clone());
        }
    }
    picked
}
