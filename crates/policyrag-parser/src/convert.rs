//! Document conversion: parsed elements → Markdown + rate-table sidecars.

use policyrag_core::{DocElement, ParseError, ParsedDocument, RateTableMeta, TableType};
use tracing::{debug, info};
use uuid::Uuid;

use crate::markdown::{render_markdown, TableRendering};
use crate::postprocess::postprocess_markdown;
use crate::tables::{RateTableClassifier, TableExporter};

/// The converted form of one document.
#[derive(Debug)]
pub struct ConvertedDocument {
    /// Post-processed Markdown with rate-table placeholders.
    pub markdown: String,
    /// Sidecar records for every exported rate table, in document order.
    pub rate_tables: Vec<RateTableMeta>,
}

impl ConvertedDocument {
    /// Uuids of all exported rate tables.
    #[must_use]
    pub fn table_refs(&self) -> Vec<Uuid> {
        self.rate_tables.iter().map(|m| m.uuid).collect()
    }
}

/// Walks parsed elements, splits off rate tables, and renders Markdown.
pub struct Converter {
    classifier: RateTableClassifier,
    exporter: TableExporter,
    /// When disabled, every table stays inline (ENABLE_TABLE_SEPARATION).
    table_separation: bool,
}

impl Converter {
    pub fn new(exporter: TableExporter, table_separation: bool) -> Self {
        Self {
            classifier: RateTableClassifier::new(),
            exporter,
            table_separation,
        }
    }

    /// Convert one parsed document.
    pub fn convert(
        &self,
        parsed: &ParsedDocument,
        product_code: &str,
        source_pdf: &str,
    ) -> Result<ConvertedDocument, ParseError> {
        let mut renderings = Vec::new();
        let mut rate_tables = Vec::new();

        for element in &parsed.elements {
            if let DocElement::Table(table) = element {
                let table_type = self.classifier.classify(table);
                let separate = self.table_separation && table_type != TableType::Ordinary;
                if separate {
                    let meta = self.exporter.export(
                        table,
                        table_type,
                        product_code,
                        source_pdf,
                        &self.classifier.rule_description(table),
                    )?;
                    renderings.push(TableRendering::Placeholder(meta.uuid));
                    rate_tables.push(meta);
                } else {
                    debug!(page = table.page, "keeping table inline");
                    renderings.push(TableRendering::Inline);
                }
            }
        }

        let markdown = postprocess_markdown(&render_markdown(&parsed.elements, &renderings));
        info!(
            source = source_pdf,
            rate_tables = rate_tables.len(),
            "converted document"
        );

        Ok(ConvertedDocument {
            markdown,
            rate_tables,
        })
    }
}
