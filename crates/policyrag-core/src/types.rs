//! Core types for policyrag.
//!
//! This module contains all shared data structures used across the workspace:
//!
//! ## Catalog
//! - [`Product`]: A logical insurance product
//! - [`PolicyDocument`]: One PDF belonging to a product
//! - [`VerificationStatus`]: Human-review state of a document
//!
//! ## Parsing
//! - [`ParsedDocument`]: Ordered element stream extracted from a PDF
//! - [`DocElement`]: Typed document elements in reading order
//! - [`DocTable`]: A table with headers, rows, and page provenance
//! - [`RateTableMeta`]: Sidecar record for an extracted rate table
//!
//! ## Chunks
//! - [`PolicyChunk`]: The retrieval unit
//! - [`ClauseCategory`] / [`EntityRole`]: Semantic classification
//! - [`TableData`]: Structure of a preserved inline table
//!
//! ## Retrieval
//! - [`SearchFilters`]: Equality filters pushed into the dense query
//! - [`MetadataValue`] / [`MetadataFilter`]: Scalar store metadata
//! - [`DenseHit`] / [`SparseHit`] / [`RetrievedChunk`]: Result shapes
//! - [`SourceRef`]: Mandatory provenance block

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Catalog
// ============================================================================

/// A logical insurance product, created on first discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Stable identifier
    pub id: Uuid,
    /// Product code, unique within a company
    pub product_code: String,
    /// Full product name, e.g. "平安福耀年金保险（分红型）"
    pub name: String,
    /// Issuing company, e.g. "平安人寿"
    pub company: String,
    /// Product category, e.g. life / health
    pub category: Option<String>,
    /// Publish time as disclosed by the insurer
    pub publish_time: Option<String>,
    /// When the product was first discovered
    pub created_at: DateTime<Utc>,
}

/// Kind of PDF attached to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocType {
    /// 产品条款
    Clause,
    /// 产品说明书
    Manual,
    /// 产品费率表
    RateTable,
}

impl DocType {
    /// Chinese display label as used on insurer disclosure portals.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            DocType::Clause => "产品条款",
            DocType::Manual => "产品说明书",
            DocType::RateTable => "产品费率表",
        }
    }

    /// Stable string form used in store metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Clause => "clause",
            DocType::Manual => "manual",
            DocType::RateTable => "rate-table",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clause" => Some(DocType::Clause),
            "manual" => Some(DocType::Manual),
            "rate-table" => Some(DocType::RateTable),
            _ => None,
        }
    }
}

/// Human-review state of a document.
///
/// PENDING → VERIFIED or PENDING → REJECTED; REJECTED → PENDING is allowed on
/// resubmission. Only VERIFIED documents may be ingested into the indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

/// One PDF belonging to a [`Product`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: Uuid,
    pub product_id: Uuid,
    pub doc_type: DocType,
    pub filename: String,
    /// Local path under `{root}/raw/{company}/{product_code}/`
    pub local_path: PathBuf,
    /// Original download URL, kept for provenance
    pub source_url: Option<String>,
    /// SHA-256 of the downloaded file
    pub file_hash: Option<String>,
    pub file_size: Option<u64>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub verification_status: VerificationStatus,
    /// Notes from the human reviewer; also receives parse failure reports
    pub reviewer_notes: Option<String>,
    /// All PDF links discovered for this product, keyed by doc-type label
    #[serde(default)]
    pub pdf_links: HashMap<String, String>,
}

impl PolicyDocument {
    /// Whether this document is eligible for indexing.
    #[must_use]
    pub fn is_indexable(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }
}

// ============================================================================
// Parsed elements
// ============================================================================

/// A table extracted from a document, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// 1-indexed page the table starts on
    pub page: u32,
}

impl DocTable {
    /// Fraction of body cells that contain at least one digit.
    #[must_use]
    pub fn numeric_cell_ratio(&self) -> f64 {
        let mut numeric = 0usize;
        let mut total = 0usize;
        for row in &self.rows {
            for cell in row {
                total += 1;
                if cell.chars().any(|c| c.is_ascii_digit()) {
                    numeric += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            numeric as f64 / total as f64
        }
    }
}

/// A typed document element in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocElement {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    Table(DocTable),
    Figure { caption: Option<String> },
}

/// Ordered element stream extracted from one PDF.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub elements: Vec<DocElement>,
    pub page_count: u32,
}

/// Classification assigned to an extracted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    /// Numeric premium / cash-value / benefit schedule; exported as CSV
    Rate,
    /// Benefit illustration table
    Benefit,
    /// Kept inline as Markdown
    Ordinary,
}

/// Sidecar metadata record for an extracted rate table.
///
/// Appended to `{export_dir}/metadata.json`; the CSV itself lives at
/// `{export_dir}/{uuid}.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTableMeta {
    pub uuid: Uuid,
    pub source_pdf: String,
    /// Inclusive 1-indexed page range the table spans
    pub page_range: (u32, u32),
    pub product_code: String,
    pub table_type: TableType,
    /// CSV filename relative to the export directory
    pub csv_path: String,
    /// Flattened headers (nested headers joined with " / ")
    pub headers: Vec<String>,
    pub row_count: usize,
    pub col_count: usize,
    /// Classifier rule and thresholds that produced this record
    pub classifier: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Chunks
// ============================================================================

/// Semantic category of a clause chunk. Total: `General` is the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClauseCategory {
    /// 保险责任
    Liability,
    /// 责任免除
    Exclusion,
    /// 申请/理赔流程
    Process,
    /// 释义条款
    Definition,
    /// Anything the cascade cannot classify
    General,
}

impl ClauseCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ClauseCategory::Liability => "Liability",
            ClauseCategory::Exclusion => "Exclusion",
            ClauseCategory::Process => "Process",
            ClauseCategory::Definition => "Definition",
            ClauseCategory::General => "General",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Liability" => Some(ClauseCategory::Liability),
            "Exclusion" => Some(ClauseCategory::Exclusion),
            "Process" => Some(ClauseCategory::Process),
            "Definition" => Some(ClauseCategory::Definition),
            "General" => Some(ClauseCategory::General),
            _ => None,
        }
    }
}

/// Dominant contractual role a chunk speaks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRole {
    /// 保险人（我们）
    Insurer,
    /// 被保险人
    Insured,
    /// 受益人
    Beneficiary,
}

impl EntityRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityRole::Insurer => "Insurer",
            EntityRole::Insured => "Insured",
            EntityRole::Beneficiary => "Beneficiary",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Insurer" => Some(EntityRole::Insurer),
            "Insured" => Some(EntityRole::Insured),
            "Beneficiary" => Some(EntityRole::Beneficiary),
            _ => None,
        }
    }
}

/// Structure of a preserved inline table (when the chunk *is* the table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn col_count(&self) -> usize {
        self.headers.len()
    }
}

/// The retrieval unit.
///
/// Chunks are immutable once indexed; re-ingesting a document deletes all of
/// its chunks and inserts fresh ones. The id is a function of `document_id`
/// and `chunk_index` so a reindex of the same corpus reproduces the same ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChunk {
    pub id: String,
    pub document_id: Uuid,
    /// Document-local reading order across text and table chunks
    pub chunk_index: u32,
    /// Full chunk text, including the prepended `[section: …]` breadcrumb
    pub content: String,

    // Product context. Always non-empty and equal to the owning document's
    // product.
    pub company: String,
    pub product_code: String,
    pub product_name: String,
    pub doc_type: DocType,

    // Structural fields
    /// Clause number parsed from the deepest heading, e.g. "1.2.6"
    pub section_id: Option<String>,
    pub section_title: String,
    /// `section_id` minus its last segment, e.g. "1.2"
    pub parent_section: Option<String>,
    /// Heading depth, 1..=5
    pub level: u8,
    /// Breadcrumb, e.g. "保险责任 > 重疾保险金 > 给付条件"
    pub section_path: String,
    pub page_number: Option<u32>,

    // Semantic fields
    pub category: ClauseCategory,
    pub entity_role: Option<EntityRole>,
    #[serde(default)]
    pub keywords: Vec<String>,

    // Table fields. `is_table` and `table_data` describe a preserved inline
    // table; `table_refs` points at sidecar rate tables mentioned in text.
    #[serde(default)]
    pub is_table: bool,
    pub table_data: Option<TableData>,
    #[serde(default)]
    pub table_refs: Vec<Uuid>,

    /// Dense vector; regenerated on reindex, never round-tripped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl PolicyChunk {
    /// Deterministic chunk id: a function of document id and chunk index.
    #[must_use]
    pub fn make_id(document_id: &Uuid, chunk_index: u32) -> String {
        let hex = document_id.simple().to_string();
        format!("chunk_{}_{:04}", &hex[..8], chunk_index)
    }

    /// Flatten to scalar store metadata.
    ///
    /// The vector store only admits scalars: lists are comma-joined and
    /// `table_data` is JSON-encoded. `None` fields are omitted entirely.
    #[must_use]
    pub fn to_metadata(&self) -> HashMap<String, MetadataValue> {
        let mut meta = HashMap::new();
        meta.insert(
            "document_id".to_string(),
            MetadataValue::Str(self.document_id.to_string()),
        );
        meta.insert(
            "chunk_index".to_string(),
            MetadataValue::Int(i64::from(self.chunk_index)),
        );
        meta.insert(
            "company".to_string(),
            MetadataValue::Str(self.company.clone()),
        );
        meta.insert(
            "product_code".to_string(),
            MetadataValue::Str(self.product_code.clone()),
        );
        meta.insert(
            "product_name".to_string(),
            MetadataValue::Str(self.product_name.clone()),
        );
        meta.insert(
            "doc_type".to_string(),
            MetadataValue::Str(self.doc_type.as_str().to_string()),
        );
        meta.insert(
            "section_title".to_string(),
            MetadataValue::Str(self.section_title.clone()),
        );
        meta.insert(
            "section_path".to_string(),
            MetadataValue::Str(self.section_path.clone()),
        );
        meta.insert("level".to_string(), MetadataValue::Int(i64::from(self.level)));
        meta.insert(
            "category".to_string(),
            MetadataValue::Str(self.category.as_str().to_string()),
        );
        meta.insert("is_table".to_string(), MetadataValue::Bool(self.is_table));

        if let Some(ref sid) = self.section_id {
            meta.insert("section_id".to_string(), MetadataValue::Str(sid.clone()));
        }
        if let Some(ref parent) = self.parent_section {
            meta.insert(
                "parent_section".to_string(),
                MetadataValue::Str(parent.clone()),
            );
        }
        if let Some(page) = self.page_number {
            meta.insert("page_number".to_string(), MetadataValue::Int(i64::from(page)));
        }
        if let Some(role) = self.entity_role {
            meta.insert(
                "entity_role".to_string(),
                MetadataValue::Str(role.as_str().to_string()),
            );
        }
        if !self.keywords.is_empty() {
            meta.insert(
                "keywords".to_string(),
                MetadataValue::Str(self.keywords.join(",")),
            );
        }
        if !self.table_refs.is_empty() {
            let joined = self
                .table_refs
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(",");
            meta.insert("table_refs".to_string(), MetadataValue::Str(joined));
        }
        if let Some(ref data) = self.table_data {
            if let Ok(json) = serde_json::to_string(data) {
                meta.insert("table_data".to_string(), MetadataValue::Str(json));
            }
        }
        meta
    }

    /// Rebuild a chunk from store metadata and content.
    ///
    /// The embedding is not reconstructed; it is regenerated on reindex.
    #[must_use]
    pub fn from_metadata(id: &str, content: &str, meta: &HashMap<String, MetadataValue>) -> Self {
        let str_field = |key: &str| meta.get(key).and_then(MetadataValue::as_str).map(String::from);
        let int_field = |key: &str| meta.get(key).and_then(MetadataValue::as_int);

        let keywords = str_field("keywords")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_default();
        let table_refs = str_field("table_refs")
            .map(|s| s.split(',').filter_map(|p| Uuid::parse_str(p).ok()).collect())
            .unwrap_or_default();
        let table_data = str_field("table_data").and_then(|s| serde_json::from_str(&s).ok());

        PolicyChunk {
            id: id.to_string(),
            document_id: str_field("document_id")
                .and_then(|s| Uuid::parse_str(&s).ok())
                .unwrap_or_else(Uuid::nil),
            chunk_index: int_field("chunk_index").unwrap_or(0) as u32,
            content: content.to_string(),
            company: str_field("company").unwrap_or_default(),
            product_code: str_field("product_code").unwrap_or_default(),
            product_name: str_field("product_name").unwrap_or_default(),
            doc_type: str_field("doc_type")
                .and_then(|s| DocType::parse(&s))
                .unwrap_or(DocType::Clause),
            section_id: str_field("section_id"),
            section_title: str_field("section_title").unwrap_or_default(),
            parent_section: str_field("parent_section"),
            level: int_field("level").unwrap_or(1) as u8,
            section_path: str_field("section_path").unwrap_or_default(),
            page_number: int_field("page_number").map(|p| p as u32),
            category: str_field("category")
                .and_then(|s| ClauseCategory::parse(&s))
                .unwrap_or(ClauseCategory::General),
            entity_role: str_field("entity_role").and_then(|s| EntityRole::parse(&s)),
            keywords,
            is_table: meta
                .get("is_table")
                .and_then(MetadataValue::as_bool)
                .unwrap_or(false),
            table_data,
            table_refs,
            embedding: None,
        }
    }
}

// ============================================================================
// Store metadata
// ============================================================================

/// A scalar metadata value admitted by the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl MetadataValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Conjunction of equality predicates over scalar metadata.
pub type MetadataFilter = HashMap<String, MetadataValue>;

/// Whether a metadata map satisfies every predicate in a filter.
#[must_use]
pub fn matches_filter(meta: &HashMap<String, MetadataValue>, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(key, want)| meta.get(key) == Some(want))
}

// ============================================================================
// Retrieval
// ============================================================================

/// Caller-supplied equality filters for retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub company: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub doc_type: Option<DocType>,
    pub category: Option<ClauseCategory>,
    pub is_table: Option<bool>,
}

impl SearchFilters {
    /// Lower into a store-level metadata filter.
    #[must_use]
    pub fn to_metadata_filter(&self) -> MetadataFilter {
        let mut filter = MetadataFilter::new();
        if let Some(ref company) = self.company {
            filter.insert("company".to_string(), MetadataValue::Str(company.clone()));
        }
        if let Some(ref code) = self.product_code {
            filter.insert("product_code".to_string(), MetadataValue::Str(code.clone()));
        }
        if let Some(ref name) = self.product_name {
            filter.insert("product_name".to_string(), MetadataValue::Str(name.clone()));
        }
        if let Some(doc_type) = self.doc_type {
            filter.insert(
                "doc_type".to_string(),
                MetadataValue::Str(doc_type.as_str().to_string()),
            );
        }
        if let Some(category) = self.category {
            filter.insert(
                "category".to_string(),
                MetadataValue::Str(category.as_str().to_string()),
            );
        }
        if let Some(is_table) = self.is_table {
            filter.insert("is_table".to_string(), MetadataValue::Bool(is_table));
        }
        filter
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.company.is_none()
            && self.product_code.is_none()
            && self.product_name.is_none()
            && self.doc_type.is_none()
            && self.category.is_none()
            && self.is_table.is_none()
    }
}

/// One hit from the dense side.
#[derive(Debug, Clone)]
pub struct DenseHit {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, MetadataValue>,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// One hit from the sparse side.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseHit {
    pub id: String,
    pub score: f32,
}

/// A fused retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: PolicyChunk,
    /// Dense cosine similarity, when the dense side saw this chunk
    pub similarity: Option<f32>,
    pub rrf_score: f32,
    /// 1-based ranks in each source list
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
}

/// Dense store statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_chunks: u64,
    pub dimension: usize,
    /// Always "cosine" for this system
    pub metric: String,
    pub embed_model: String,
}

/// Provenance block attached to every surfaced chunk. Mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub product_name: String,
    /// Doc-type label, e.g. "产品条款"
    pub document_type: String,
    /// Path of the original PDF under the data root
    pub pdf_path: String,
    pub page_number: Option<u32>,
    pub download_url: Option<String>,
}
