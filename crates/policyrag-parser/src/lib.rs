//! Structured parsing of insurance policy PDFs.
//!
//! The offline half of the pipeline starts here: a verified PDF becomes an
//! ordered stream of typed elements, rate tables are split off as CSV
//! sidecars, and the rest is rendered to Markdown for the chunker.
//!
//! ```text
//! PDF ─→ PdfDocumentParser ─→ [DocElement] ─→ Converter ─┬→ Markdown
//!                                                        └→ {uuid}.csv + metadata.json
//! ```
//!
//! Parsing failures are per-document: the document is reported and skipped,
//! partial results are never committed.

mod convert;
mod markdown;
mod pdf;
mod postprocess;
mod structure;
mod tables;

pub use convert::{ConvertedDocument, Converter};
pub use markdown::{render_gfm_table, render_markdown, TableRendering};
pub use pdf::PdfDocumentParser;
pub use postprocess::postprocess_markdown;
pub use structure::build_elements;
pub use tables::{RateTableClassifier, TableExporter};
