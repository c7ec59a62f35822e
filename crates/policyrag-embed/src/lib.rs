//! Text embedding for policy clauses.
//!
//! Two [`Embedder`](policyrag_core::Embedder) implementations:
//!
//! - [`HashingEmbedder`]: deterministic character-n-gram feature hashing.
//!   Always available; no model download. The default for tests and for
//!   environments without the ML stack.
//! - [`CandleEmbedder`] (feature `candle`): BAAI/bge-small-zh-v1.5 via
//!   Candle, a small Chinese sentence-embedding model (512-dim BERT).
//!
//! [`EmbedderPool`] bounds concurrent inference with a semaphore.

#[cfg(feature = "candle")]
mod candle;
mod hash;
mod pool;

#[cfg(feature = "candle")]
pub use candle::CandleEmbedder;
pub use hash::HashingEmbedder;
pub use pool::EmbedderPool;
