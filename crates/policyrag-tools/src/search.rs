//! `search_policy_clause`: hybrid clause retrieval with filters.

use policyrag_core::{ClauseCategory, DocType, Result, SearchFilters, ToolError};
use policyrag_retriever::RetrievalRequest;
use tracing::debug;

use crate::types::{ClauseResult, SearchPolicyClauseParams};
use crate::PolicyTools;

/// Rate-schedule markers that, together with a digit, imply the caller wants
/// the 费率表 document rather than the clause text.
const RATE_QUERY_KEYWORDS: &[&str] = &["保费", "费率", "多少钱", "价格", "费用", "成本", "交多少"];

impl PolicyTools {
    pub(crate) async fn search_policy_clause(
        &self,
        params: SearchPolicyClauseParams,
    ) -> Result<Vec<ClauseResult>> {
        let category = params
            .category
            .as_deref()
            .map(|raw| {
                ClauseCategory::parse(raw)
                    .ok_or_else(|| ToolError::InvalidInput(format!("unknown category '{raw}'")))
            })
            .transpose()?;

        let mut doc_type = params
            .doc_type
            .as_deref()
            .map(|raw| {
                DocType::parse(raw)
                    .ok_or_else(|| ToolError::InvalidInput(format!("unknown doc_type '{raw}'")))
            })
            .transpose()?;

        if doc_type.is_none() {
            doc_type = infer_doc_type(&params.query);
            if let Some(inferred) = doc_type {
                debug!("inferred doc_type {:?} from query", inferred);
            }
        }

        let filters = SearchFilters {
            company: params.company.clone(),
            product_code: params.product_code.clone(),
            product_name: params.product_name.clone(),
            doc_type,
            category,
            is_table: None,
        };

        let request = RetrievalRequest::new(params.query.clone(), params.top_k)
            .with_filters(filters)
            .with_min_similarity(params.min_similarity);
        let outcome = self.retriever().search(&request).await?;

        let mut results = Vec::with_capacity(outcome.chunks.len());
        for retrieved in &outcome.chunks {
            results.push(ClauseResult {
                chunk_id: retrieved.chunk.id.clone(),
                content: retrieved.chunk.content.clone(),
                section_id: retrieved.chunk.section_id.clone(),
                section_title: retrieved.chunk.section_title.clone(),
                similarity_score: retrieved.similarity.unwrap_or(0.0).max(0.0),
                source_reference: self.source_ref(&retrieved.chunk).await?,
            });
        }
        Ok(results)
    }
}

/// Infer the target document type from the query shape: rate keywords plus a
/// digit mean the caller is after the premium schedule.
fn infer_doc_type(query: &str) -> Option<DocType> {
    let has_digit = query.chars().any(|c| c.is_ascii_digit());
    if has_digit && RATE_QUERY_KEYWORDS.iter().any(|kw| query.contains(kw)) {
        return Some(DocType::RateTable);
    }
    None
}
