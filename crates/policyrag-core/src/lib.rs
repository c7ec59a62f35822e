//! # policyrag-core
//!
//! Core types and traits for policyrag, a retrieval service for Chinese
//! insurance policy documents.
//!
//! This crate provides the foundational abstractions used throughout the
//! workspace:
//!
//! - **Document parsing**: [`DocumentParser`] turns a verified PDF into an
//!   ordered element stream
//! - **Chunking**: [`MarkdownChunker`](trait@Chunker) splits Markdown into
//!   retrieval chunks with heading context
//! - **Embedding**: [`Embedder`] maps text to fixed-dimension dense vectors
//! - **Dense storage**: [`VectorStore`] persists chunks with filtered KNN
//! - **Sparse storage**: [`SparseIndex`] provides BM25 keyword retrieval
//! - **Catalog**: [`Catalog`] holds Product and PolicyDocument records
//!
//! ## Architecture
//!
//! ```text
//! PDF → DocumentParser → Chunker → Enricher → Embedder → VectorStore
//!                                                      → SparseIndex
//!                                                            ↓
//!                                       query → HybridRetriever → tools
//! ```
//!
//! The guiding invariant is zero fabrication: every surfaced chunk comes out
//! of a VERIFIED [`PolicyDocument`] and carries a [`SourceRef`] back to the
//! original PDF.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    ChunkError, EmbedError, Error, LimiterError, ParseError, Result, RetrieveError, StoreError,
    ToolError,
};
pub use traits::*;
pub use types::*;
