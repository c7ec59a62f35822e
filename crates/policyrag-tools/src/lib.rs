//! Retrieval tools exposed to MCP clients.
//!
//! Four tools over the shared retriever and catalog:
//!
//! - `search_policy_clause`: hybrid clause retrieval with filters
//! - `check_exclusion_risk`: exclusion-focused scenario check
//! - `calculate_surrender_value_logic`: surrender / reduced-paid-up rules
//! - `lookup_product`: fuzzy product lookup (catalog only, no vectors)
//!
//! The transport presents a name + arguments pair; [`ToolRequest::parse`]
//! turns that into a tagged variant and [`PolicyTools::dispatch`] matches
//! exhaustively. The tool layer never synthesizes content: an empty result
//! is always a valid response.

mod exclusion;
mod product;
mod search;
mod surrender;
mod types;

pub use types::{
    CheckExclusionRiskParams, ClauseResult, ExclusionRiskResult, LookupProductParams,
    ProductInfo, SearchPolicyClauseParams, SurrenderLogicParams, SurrenderLogicResult,
    SurrenderOperation,
};

use policyrag_core::{Catalog, PolicyChunk, Result, SourceRef, ToolError};
use policyrag_retriever::HybridRetriever;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A parsed tool invocation.
#[derive(Debug)]
pub enum ToolRequest {
    SearchPolicyClause(SearchPolicyClauseParams),
    CheckExclusionRisk(CheckExclusionRiskParams),
    CalculateSurrenderValueLogic(SurrenderLogicParams),
    LookupProduct(LookupProductParams),
}

impl ToolRequest {
    /// Tool names as the transport announces them.
    pub const NAMES: &'static [&'static str] = &[
        "search_policy_clause",
        "check_exclusion_risk",
        "calculate_surrender_value_logic",
        "lookup_product",
    ];

    /// Parse a name + arguments pair from the transport.
    pub fn parse(name: &str, arguments: Value) -> std::result::Result<Self, ToolError> {
        let invalid = |e: serde_json::Error| ToolError::InvalidInput(format!("{name}: {e}"));
        match name {
            "search_policy_clause" => Ok(ToolRequest::SearchPolicyClause(
                serde_json::from_value(arguments).map_err(invalid)?,
            )),
            "check_exclusion_risk" => Ok(ToolRequest::CheckExclusionRisk(
                serde_json::from_value(arguments).map_err(invalid)?,
            )),
            "calculate_surrender_value_logic" => Ok(ToolRequest::CalculateSurrenderValueLogic(
                serde_json::from_value(arguments).map_err(invalid)?,
            )),
            "lookup_product" => Ok(ToolRequest::LookupProduct(
                serde_json::from_value(arguments).map_err(invalid)?,
            )),
            other => Err(ToolError::InvalidInput(format!("unknown tool '{other}'"))),
        }
    }
}

/// A tool result, one variant per tool.
#[derive(Debug)]
pub enum ToolResponse {
    Clauses(Vec<ClauseResult>),
    ExclusionRisk(ExclusionRiskResult),
    SurrenderLogic(Box<SurrenderLogicResult>),
    Products(Vec<ProductInfo>),
}

impl ToolResponse {
    /// JSON payload for the transport.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            ToolResponse::Clauses(results) => serde_json::json!(results),
            ToolResponse::ExclusionRisk(result) => serde_json::json!(result),
            ToolResponse::SurrenderLogic(result) => serde_json::json!(result),
            ToolResponse::Products(results) => serde_json::json!(results),
        }
    }
}

/// The tool surface.
pub struct PolicyTools {
    retriever: Arc<HybridRetriever>,
    catalog: Arc<dyn Catalog>,
}

impl PolicyTools {
    pub fn new(retriever: Arc<HybridRetriever>, catalog: Arc<dyn Catalog>) -> Self {
        Self { retriever, catalog }
    }

    /// Route one parsed request to its handler.
    pub async fn dispatch(&self, request: ToolRequest) -> Result<ToolResponse> {
        debug!(?request, "dispatching tool request");
        match request {
            ToolRequest::SearchPolicyClause(params) => {
                Ok(ToolResponse::Clauses(self.search_policy_clause(params).await?))
            }
            ToolRequest::CheckExclusionRisk(params) => Ok(ToolResponse::ExclusionRisk(
                self.check_exclusion_risk(params).await?,
            )),
            ToolRequest::CalculateSurrenderValueLogic(params) => Ok(ToolResponse::SurrenderLogic(
                Box::new(self.calculate_surrender_value_logic(params).await?),
            )),
            ToolRequest::LookupProduct(params) => {
                Ok(ToolResponse::Products(self.lookup_product(params).await?))
            }
        }
    }

    /// Build the mandatory provenance block for a chunk.
    pub(crate) async fn source_ref(&self, chunk: &PolicyChunk) -> Result<SourceRef> {
        let document = self.catalog.get_document(&chunk.document_id).await?;
        let (pdf_path, download_url) = match document {
            Some(doc) => (
                doc.local_path.to_string_lossy().into_owned(),
                doc.source_url,
            ),
            None => (String::new(), None),
        };
        Ok(SourceRef {
            product_name: chunk.product_name.clone(),
            document_type: chunk.doc_type.label().to_string(),
            pdf_path,
            page_number: chunk.page_number,
            download_url,
        })
    }

    pub(crate) fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use chrono::Utc;
    use policyrag_core::{
        ClauseCategory, DocType, Embedder, PolicyDocument, Product, SparseIndex, VectorStore,
        VerificationStatus,
    };
    use policyrag_embed::HashingEmbedder;
    use policyrag_retriever::RetrieverConfig;
    use policyrag_store::{Bm25Index, JsonCatalog, LocalVectorStore};
    use std::collections::HashMap;
    use uuid::Uuid;

    pub const FUYAO_CODE: &str = "C000120322";

    pub struct Corpus {
        pub tools: PolicyTools,
        pub document_id: Uuid,
        pub rate_table_uuid: Uuid,
    }

    /// A small Fuyao-annuity corpus covering the end-to-end scenarios:
    /// 1.4 保险期间, 2.1.3 酒后驾驶, 5.2 退保, 6.4 减额交清, plus one
    /// rate-table reference.
    pub async fn fuyao_corpus() -> Corpus {
        let catalog = Arc::new(JsonCatalog::in_memory());
        let store = Arc::new(LocalVectorStore::in_memory("feature-hash-v1", 512));
        let sparse = Arc::new(Bm25Index::in_memory());
        let embedder = Arc::new(HashingEmbedder::new());

        let product = Product {
            id: Uuid::new_v4(),
            product_code: FUYAO_CODE.to_string(),
            name: "平安福耀年金保险（分红型）".to_string(),
            company: "平安人寿".to_string(),
            category: Some("年金保险".to_string()),
            publish_time: Some("2021-06".to_string()),
            created_at: Utc::now(),
        };
        catalog.upsert_product(&product).await.unwrap();

        let other = Product {
            id: Uuid::new_v4(),
            product_code: "G88".to_string(),
            name: "国寿鑫享金生年金保险".to_string(),
            company: "中国人寿".to_string(),
            category: Some("年金保险".to_string()),
            publish_time: None,
            created_at: Utc::now(),
        };
        catalog.upsert_product(&other).await.unwrap();

        let document_id = Uuid::new_v4();
        let document = PolicyDocument {
            id: document_id,
            product_id: product.id,
            doc_type: DocType::Clause,
            filename: "产品条款.pdf".to_string(),
            local_path: "raw/平安人寿/C000120322/产品条款.pdf".into(),
            source_url: Some("https://life.pingan.com/fuyao.pdf".to_string()),
            file_hash: None,
            file_size: None,
            downloaded_at: None,
            verification_status: VerificationStatus::Verified,
            reviewer_notes: None,
            pdf_links: HashMap::new(),
        };
        catalog.upsert_document(&document).await.unwrap();

        let rate_table_uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"fuyao-cash-value-table");

        let entries: Vec<(&str, String, ClauseCategory, u8)> = vec![
            (
                "1.4 保险期间",
                "本合同的保险期间为终身，自本合同生效之日零时开始。".to_string(),
                ClauseCategory::Process,
                2,
            ),
            (
                "2.1.3 酒后驾驶",
                "责任免除：被保险人酒后驾驶、饮酒、醉酒或者受酒精影响期间驾驶机动车的，我们不承担给付保险金的责任。"
                    .to_string(),
                ClauseCategory::Exclusion,
                3,
            ),
            (
                "5.2 退保",
                format!(
                    "您可以申请解除本合同（退保）。退保时我们退还保单的现金价值，合同效力终止。现金价值数额见现金价值表[rate-table: {rate_table_uuid}]。"
                ),
                ClauseCategory::Process,
                2,
            ),
            (
                "6.4 减额交清",
                "您可以申请减额交清，以现金价值作为一次交清的保险费，基本保险金额相应降低，合同继续有效。"
                    .to_string(),
                ClauseCategory::Process,
                2,
            ),
        ];

        let mut chunks = Vec::new();
        for (index, (title, body, category, level)) in entries.iter().enumerate() {
            let content = format!("[section: {title}]\n\n{title}\n{body}");
            let embedding = embedder.embed(&content).await.unwrap();
            let section_id = title.split(' ').next().unwrap().to_string();
            let table_refs = if body.contains("rate-table") {
                vec![rate_table_uuid]
            } else {
                vec![]
            };
            chunks.push(PolicyChunk {
                id: PolicyChunk::make_id(&document_id, index as u32),
                document_id,
                chunk_index: index as u32,
                content,
                company: "平安人寿".to_string(),
                product_code: FUYAO_CODE.to_string(),
                product_name: product.name.clone(),
                doc_type: DocType::Clause,
                section_id: Some(section_id.clone()),
                section_title: (*title).to_string(),
                parent_section: Some(section_id.split('.').next().unwrap().to_string()),
                level: *level,
                section_path: (*title).to_string(),
                page_number: Some(index as u32 + 3),
                category: *category,
                entity_role: None,
                keywords: vec![],
                is_table: false,
                table_data: None,
                table_refs,
                embedding: Some(embedding),
            });
        }

        store.upsert(&chunks).await.unwrap();
        sparse.build(&chunks).await.unwrap();

        let retriever = Arc::new(HybridRetriever::new(
            store,
            sparse,
            embedder,
            RetrieverConfig::default(),
        ));

        Corpus {
            tools: PolicyTools::new(retriever, catalog),
            document_id,
            rate_table_uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let err = ToolRequest::parse("delete_everything", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_parse_malformed_arguments() {
        let err = ToolRequest::parse("search_policy_clause", serde_json::json!({"top_k": 3}))
            .unwrap_err();
        // Missing required `query`.
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_dispatch_routes_lookup() {
        let corpus = testutil::fuyao_corpus().await;
        let request = ToolRequest::parse(
            "lookup_product",
            serde_json::json!({"product_name": "福耀"}),
        )
        .unwrap();
        let response = corpus.tools.dispatch(request).await.unwrap();
        match response {
            ToolResponse::Products(products) => assert!(!products.is_empty()),
            other => panic!("expected products, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_json_is_always_a_list_or_object() {
        let corpus = testutil::fuyao_corpus().await;
        let request = ToolRequest::parse(
            "search_policy_clause",
            serde_json::json!({"query": "火星旅行", "min_similarity": 0.99}),
        )
        .unwrap();
        let response = corpus.tools.dispatch(request).await.unwrap();
        // Empty result is a valid response: an empty list, not null.
        assert_eq!(response.to_json(), serde_json::json!([]));
    }
}
