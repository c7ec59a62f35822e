//! Tool parameter and result records.
//!
//! Every tool takes and returns structured, JSON-serializable records. List
//! fields are always present (possibly empty); optional fields serialize as
//! null, not absence. Every surfaced chunk carries a [`SourceRef`].

use policyrag_core::SourceRef;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    -1.0
}

fn default_strict() -> bool {
    true
}

// ============================================================================
// search_policy_clause
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPolicyClauseParams {
    pub query: String,
    pub company: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    /// "clause" / "manual" / "rate-table"
    pub doc_type: Option<String>,
    /// "Liability" / "Exclusion" / "Process" / "Definition" / "General"
    pub category: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Dense similarity floor; negative disables pruning.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

/// One retrieved clause with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseResult {
    pub chunk_id: String,
    pub content: String,
    pub section_id: Option<String>,
    pub section_title: String,
    pub similarity_score: f32,
    pub source_reference: SourceRef,
}

// ============================================================================
// check_exclusion_risk
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CheckExclusionRiskParams {
    pub scenario_description: String,
    pub product_code: Option<String>,
    /// When true, clauses below the recall floor are dropped entirely.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRiskResult {
    pub risk_detected: bool,
    pub relevant_clauses: Vec<ClauseResult>,
    pub summary: String,
    /// Fixed, non-empty reference-only notice.
    pub disclaimer: String,
}

// ============================================================================
// calculate_surrender_value_logic
// ============================================================================

/// Which contract-termination option to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurrenderOperation {
    /// 退保（解除合同）
    Surrender,
    /// 减额交清
    ReducedPaidUp,
}

impl SurrenderOperation {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            SurrenderOperation::Surrender => "退保",
            SurrenderOperation::ReducedPaidUp => "减额交清",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurrenderLogicParams {
    pub product_code: String,
    pub policy_year: Option<u32>,
    pub operation: SurrenderOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurrenderLogicResult {
    pub operation_name: String,
    /// Literal clause text defining the operation.
    pub definition: String,
    pub calculation_rules: Vec<String>,
    pub conditions: Vec<String>,
    pub consequences: Vec<String>,
    /// Uuids of referenced rate-table sidecars.
    pub related_tables: Vec<Uuid>,
    pub comparison_note: String,
    pub source_references: Vec<SourceRef>,
}

// ============================================================================
// lookup_product
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LookupProductParams {
    pub product_name: String,
    pub company: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: Uuid,
    pub product_code: String,
    pub product_name: String,
    pub company: String,
    pub category: Option<String>,
    pub publish_time: Option<String>,
}
