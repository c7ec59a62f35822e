//! PDF document parser.
//!
//! Uses pdf-extract for text (it restores reading order across columns) and
//! lopdf for document-level inspection (page count, encryption dictionary).

use async_trait::async_trait;
use lopdf::Document;
use policyrag_core::{DocumentParser, ParseError, ParsedDocument};
use std::path::Path;
use tracing::{debug, warn};

use crate::structure::build_elements;

/// Parser for insurer clause PDFs.
pub struct PdfDocumentParser;

impl PdfDocumentParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfDocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentParser for PdfDocumentParser {
    async fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        debug!("parsing pdf: {:?}", path);

        let bytes = tokio::fs::read(path).await?;
        let display_path = path.display().to_string();

        // Both lopdf and pdf-extract are blocking.
        let parsed = tokio::task::spawn_blocking(move || parse_bytes(&bytes, &display_path))
            .await
            .map_err(|e| ParseError::Unreadable(format!("parse task failed: {e}")))??;

        if parsed.elements.is_empty() {
            return Err(ParseError::Empty(path.display().to_string()));
        }

        Ok(parsed)
    }
}

fn parse_bytes(bytes: &[u8], display_path: &str) -> Result<ParsedDocument, ParseError> {
    let encrypted = match Document::load_mem(bytes) {
        Ok(doc) => doc.trailer.get(b"Encrypt").is_ok(),
        Err(e) => {
            warn!("lopdf could not load {display_path}: {e}");
            false
        }
    };

    // pdf-extract attempts an empty-password decrypt on its own; if that
    // fails on a document with an Encrypt dictionary, surface the distinct
    // error kind so the reviewer sees why ingestion stopped.
    let text = match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => text,
        Err(e) if encrypted => {
            return Err(ParseError::Encrypted(format!("{display_path}: {e}")));
        }
        Err(e) => return Err(ParseError::Unreadable(format!("{display_path}: {e}"))),
    };

    if text.trim().is_empty() {
        return Err(ParseError::Empty(display_path.to_string()));
    }

    // Form feeds mark page boundaries in pdf-extract output. Page boundaries
    // do not imply new headings; they only feed page provenance.
    let pages: Vec<&str> = text.split('\x0C').collect();
    let page_count = pages.len().max(1) as u32;

    let mut elements = Vec::new();
    for (idx, page_text) in pages.iter().enumerate() {
        let page_num = (idx + 1) as u32;
        elements.extend(build_elements(page_text, page_num));
    }

    debug!(
        "parsed {display_path}: {} pages, {} elements",
        page_count,
        elements.len()
    );

    Ok(ParsedDocument {
        elements,
        page_count,
    })
}
