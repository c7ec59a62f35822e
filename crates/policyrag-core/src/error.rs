//! Error types for policyrag.

use thiserror::Error;

/// Main error type for policyrag operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Document parsing failed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Chunking failed
    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Vector store or sparse index operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rate limiter refused the request
    #[error("limiter error: {0}")]
    Limiter(#[from] LimiterError),

    /// Online retrieval failed
    #[error("retrieve error: {0}")]
    Retrieve(#[from] RetrieveError),

    /// Tool-level failure
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

/// Document parsing errors. Per-document: a failure skips the document and
/// leaves it PENDING with reviewer notes.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unreadable pdf: {0}")]
    Unreadable(String),

    /// Encrypted PDF that the empty-password attempt could not open
    #[error("encrypted pdf: {0}")]
    Encrypted(String),

    #[error("empty document: {0}")]
    Empty(String),

    #[error("table extraction failed: {0}")]
    Table(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunking errors.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunking failed: {0}")]
    Failed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("input too long: {tokens} tokens, max {max}")]
    InputTooLong { tokens: usize, max: usize },
}

/// Vector store and sparse index errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    Init(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("delete failed: {0}")]
    Delete(String),

    /// Query embedding model or dimension disagrees with the stored index
    #[error("index mismatch: query uses {query_model}/{query_dim}, index holds {index_model}/{index_dim}")]
    IndexMismatch {
        query_model: String,
        query_dim: usize,
        index_model: String,
        index_dim: usize,
    },

    #[error("persistence failed: {0}")]
    Persist(String),
}

/// Rate limiter errors (offline path only).
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Non-retryable at this layer; caller must back off
    #[error("circuit open for {domain}, retry after {retry_after_secs}s")]
    CircuitOpen {
        domain: String,
        retry_after_secs: u64,
    },

    /// The blocking acquire was cancelled by the caller
    #[error("acquire cancelled")]
    Cancelled,
}

/// Online retrieval errors.
#[derive(Error, Debug)]
pub enum RetrieveError {
    /// Deadline exceeded before either side completed past its cutoff
    #[error("retrieval timed out after {0}ms")]
    Timeout(u128),

    /// Both the dense and the sparse side failed
    #[error("both retrieval sides failed: dense: {dense}; sparse: {sparse}")]
    BothSidesFailed { dense: String, sparse: String },
}

/// Tool-level errors.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Malformed filters or unknown enum values
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown product_code in a tool that requires one
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type alias for policyrag operations.
pub type Result<T> = std::result::Result<T, Error>;
