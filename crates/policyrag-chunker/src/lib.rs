//! Markdown-aware chunking and metadata enrichment.
//!
//! [`MarkdownChunker`] splits post-processed Markdown along its heading
//! hierarchy into drafts that each hold one logical unit, carry a breadcrumb
//! path, and keep tables intact. [`MetadataEnricher`] then fills the semantic
//! fields: clause category, entity role, keywords, and section ids.

mod chunker;
mod enrich;

pub use chunker::{ChunkDraft, ChunkerConfig, MarkdownChunker};
pub use enrich::MetadataEnricher;
