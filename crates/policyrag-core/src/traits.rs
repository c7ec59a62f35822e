//! Core traits for policyrag components.
//!
//! This module defines the seams between pipeline stages:
//!
//! - [`DocumentParser`]: PDF → ordered element stream
//! - [`Embedder`]: text → fixed-dimension dense vector
//! - [`VectorStore`]: persistent dense store with filtered KNN
//! - [`SparseIndex`]: BM25 keyword retrieval
//! - [`Catalog`]: Product and PolicyDocument records
//!
//! All implementations are swappable behind `Arc<dyn …>`; tests use cheap
//! in-memory stand-ins.

use async_trait::async_trait;
use std::path::Path;
use uuid::Uuid;

use crate::error::{EmbedError, ParseError, StoreError};
use crate::types::{
    DenseHit, MetadataFilter, ParsedDocument, PolicyChunk, PolicyDocument, Product, SparseHit,
    StoreStats, VerificationStatus,
};

// ============================================================================
// Parsing
// ============================================================================

/// Converts one PDF into an ordered, typed element stream.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse the document at `path`.
    ///
    /// Encrypted PDFs get one empty-password decrypt attempt, then fail with
    /// [`ParseError::Encrypted`]. Partial results are never returned.
    async fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError>;
}

// ============================================================================
// Embedding
// ============================================================================

/// Maps text to a deterministic fixed-dimension dense vector.
///
/// Calls are pure: the same text yields the same vector for a given model
/// version. The model identity and dimension are recorded alongside the dense
/// index so incompatible queries are refused.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, e.g. "BAAI/bge-small-zh-v1.5".
    fn model_name(&self) -> &str;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Maximum tokens per input.
    fn max_tokens(&self) -> usize;

    /// Embed a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut results = self.embed_batch(&[text]).await?;
        results
            .pop()
            .ok_or_else(|| EmbedError::Inference("empty embedding result".to_string()))
    }
}

// ============================================================================
// Dense storage
// ============================================================================

/// Persistent `{id → (vector, metadata, content)}` store with filtered
/// cosine nearest-neighbor retrieval.
///
/// Metadata values are scalars; lists are serialized to delimited strings by
/// [`PolicyChunk::to_metadata`] and reconstructed on read.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Bulk insert or replace chunks.
    async fn upsert(&self, chunks: &[PolicyChunk]) -> Result<(), StoreError>;

    /// Delete chunks whose metadata satisfies `filter`. Returns the count.
    async fn delete_where(&self, filter: &MetadataFilter) -> Result<u64, StoreError>;

    /// Cosine KNN with optional equality filters.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DenseHit>, StoreError>;

    /// Fetch a single chunk by id.
    async fn get(&self, id: &str) -> Result<Option<PolicyChunk>, StoreError>;

    /// All chunk ids currently stored, unordered.
    async fn ids(&self) -> Result<Vec<String>, StoreError>;

    /// Count, dimension, metric, and embedding model identity.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

// ============================================================================
// Sparse storage
// ============================================================================

/// Token-based retrieval for exact matches (clause numbers, specific terms).
#[async_trait]
pub trait SparseIndex: Send + Sync {
    /// Rebuild the index in full from `chunks`.
    async fn build(&self, chunks: &[PolicyChunk]) -> Result<(), StoreError>;

    /// Search, returning up to `k` (id, score) pairs, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SparseHit>, StoreError>;

    /// All chunk ids currently indexed, unordered.
    async fn ids(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// Catalog
// ============================================================================

/// Read-mostly store of Product and PolicyDocument records.
///
/// Writes originate only from the offline ingestion path.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError>;

    async fn get_product(&self, id: &Uuid) -> Result<Option<Product>, StoreError>;

    async fn get_product_by_code(&self, product_code: &str)
        -> Result<Option<Product>, StoreError>;

    /// All products, optionally restricted to one company.
    async fn list_products(&self, company: Option<&str>) -> Result<Vec<Product>, StoreError>;

    async fn upsert_document(&self, document: &PolicyDocument) -> Result<(), StoreError>;

    async fn get_document(&self, id: &Uuid) -> Result<Option<PolicyDocument>, StoreError>;

    /// All documents for a product.
    async fn list_documents(&self, product_id: &Uuid) -> Result<Vec<PolicyDocument>, StoreError>;

    /// Transition a document's verification status and replace reviewer
    /// notes. VERIFIED is terminal for indexing purposes; changes require
    /// explicit re-review.
    async fn set_verification(
        &self,
        id: &Uuid,
        status: VerificationStatus,
        reviewer_notes: Option<String>,
    ) -> Result<(), StoreError>;
}
