//! Rate-table classification and sidecar export.
//!
//! Rate tables carry numeric premium / cash-value / benefit schedules. They
//! are never embedded: each one becomes `{export_dir}/{uuid}.csv` plus a
//! record in `{export_dir}/metadata.json`, and the Markdown keeps only a
//! `[rate-table: {uuid}]` placeholder.

use chrono::Utc;
use policyrag_core::{DocTable, ParseError, RateTableMeta, TableType};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Header tokens that mark a rate-bearing table.
const RATE_KEYWORDS: &[&str] = &[
    "age",
    "年龄",
    "premium",
    "保费",
    "rate",
    "费率",
    "cash value",
    "现金价值",
    "benefit",
    "利益",
];

/// Minimum rows before a table can be a rate table; tiny tables are kept
/// inline where their context lives.
const MIN_RATE_TABLE_ROWS: usize = 5;

/// Numeric-cell ratio required when a rate keyword is present.
const KEYWORD_NUMERIC_RATIO: f64 = 0.5;

/// Numeric-cell ratio that classifies on its own.
const BARE_NUMERIC_RATIO: f64 = 0.8;

/// Classifies tables into rate tables (exported) and ordinary tables
/// (kept inline as Markdown).
pub struct RateTableClassifier;

impl RateTableClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify one table.
    #[must_use]
    pub fn classify(&self, table: &DocTable) -> TableType {
        if table.rows.len() < MIN_RATE_TABLE_ROWS {
            return TableType::Ordinary;
        }

        let header_text = table.headers.join(" ").to_lowercase();
        let mut has_keyword = RATE_KEYWORDS.iter().any(|kw| header_text.contains(kw));
        if !has_keyword {
            // Headers sometimes land in the first row.
            if let Some(first) = table.rows.first() {
                let first_text = first.join(" ").to_lowercase();
                has_keyword = RATE_KEYWORDS.iter().any(|kw| first_text.contains(kw));
            }
        }

        let ratio = table.numeric_cell_ratio();
        if has_keyword && ratio > KEYWORD_NUMERIC_RATIO {
            if header_text.contains("利益") || header_text.contains("benefit") {
                return TableType::Benefit;
            }
            return TableType::Rate;
        }
        if ratio > BARE_NUMERIC_RATIO {
            return TableType::Rate;
        }
        TableType::Ordinary
    }

    /// Human-readable record of the rule that fired, written into the sidecar
    /// metadata so threshold tuning stays auditable.
    #[must_use]
    pub fn rule_description(&self, table: &DocTable) -> String {
        format!(
            "keyword∧ratio>{KEYWORD_NUMERIC_RATIO} | ratio>{BARE_NUMERIC_RATIO}; rows={}, numeric_ratio={:.2}",
            table.rows.len(),
            table.numeric_cell_ratio()
        )
    }
}

impl Default for RateTableClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes rate-table CSVs and maintains the sidecar metadata registry.
pub struct TableExporter {
    export_dir: PathBuf,
}

impl TableExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    fn metadata_path(&self) -> PathBuf {
        self.export_dir.join("metadata.json")
    }

    /// Serialize a rate table: write the CSV, append a metadata record, and
    /// return the record. Flattens nested headers with " / ".
    pub fn export(
        &self,
        table: &DocTable,
        table_type: TableType,
        product_code: &str,
        source_pdf: &str,
        classifier_rule: &str,
    ) -> Result<RateTableMeta, ParseError> {
        std::fs::create_dir_all(&self.export_dir)?;

        // Deterministic uuid over source and content: reindexing the same
        // document reproduces the same sidecar instead of accreting copies.
        let mut name = format!("{source_pdf}#{}", table.page);
        for header in &table.headers {
            name.push('\u{1f}');
            name.push_str(header);
        }
        for row in &table.rows {
            for cell in row {
                name.push('\u{1f}');
                name.push_str(cell);
            }
        }
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        let csv_name = format!("{uuid}.csv");
        let csv_path = self.export_dir.join(&csv_name);

        let headers = flatten_headers(&table.headers);

        let mut writer = csv::Writer::from_path(&csv_path)
            .map_err(|e| ParseError::Table(format!("csv open failed: {e}")))?;
        writer
            .write_record(&headers)
            .map_err(|e| ParseError::Table(format!("csv header write failed: {e}")))?;
        for row in &table.rows {
            writer
                .write_record(row)
                .map_err(|e| ParseError::Table(format!("csv row write failed: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| ParseError::Table(format!("csv flush failed: {e}")))?;

        let meta = RateTableMeta {
            uuid,
            source_pdf: source_pdf.to_string(),
            page_range: (table.page, table.page),
            product_code: product_code.to_string(),
            table_type,
            csv_path: csv_name,
            headers,
            row_count: table.rows.len(),
            col_count: table.headers.len(),
            classifier: classifier_rule.to_string(),
            created_at: Utc::now(),
        };

        self.append_metadata(&meta)?;
        info!(uuid = %uuid, page = table.page, "exported rate table");
        Ok(meta)
    }

    /// Append a record to metadata.json atomically (write temp + rename).
    /// Re-exporting the same table replaces its record.
    fn append_metadata(&self, meta: &RateTableMeta) -> Result<(), ParseError> {
        let mut records = self.load_metadata()?;
        records.retain(|existing| existing.uuid != meta.uuid);
        records.push(meta.clone());

        let tmp = self.metadata_path().with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| ParseError::Table(format!("metadata encode failed: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.metadata_path())?;
        Ok(())
    }

    /// All sidecar records, oldest first.
    pub fn load_metadata(&self) -> Result<Vec<RateTableMeta>, ParseError> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&path)?;
        serde_json::from_str(&json)
            .map_err(|e| ParseError::Table(format!("metadata decode failed: {e}")))
    }

    /// Look up one sidecar record by uuid.
    pub fn get(&self, uuid: &Uuid) -> Result<Option<RateTableMeta>, ParseError> {
        Ok(self.load_metadata()?.into_iter().find(|m| m.uuid == *uuid))
    }

    /// Delete every sidecar owned by `source_pdf`: CSV files and metadata
    /// records. Returns the number of tables collected.
    pub fn remove_by_source(&self, source_pdf: &str) -> Result<usize, ParseError> {
        let records = self.load_metadata()?;
        let (owned, kept): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.source_pdf == source_pdf);
        if owned.is_empty() {
            return Ok(0);
        }

        for record in &owned {
            let csv = self.export_dir.join(&record.csv_path);
            if csv.exists() {
                std::fs::remove_file(&csv)?;
            }
        }

        let tmp = self.metadata_path().with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&kept)
            .map_err(|e| ParseError::Table(format!("metadata encode failed: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.metadata_path())?;
        Ok(owned.len())
    }

    /// Read a sidecar CSV back as (headers, rows).
    pub fn read_csv(&self, meta: &RateTableMeta) -> Result<(Vec<String>, Vec<Vec<String>>), ParseError> {
        let path = self.export_dir.join(&meta.csv_path);
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| ParseError::Table(format!("csv read failed: {e}")))?;

        let headers = reader
            .headers()
            .map_err(|e| ParseError::Table(format!("csv header read failed: {e}")))?
            .iter()
            .map(String::from)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ParseError::Table(format!("csv row read failed: {e}")))?;
            rows.push(record.iter().map(String::from).collect());
        }
        debug!(uuid = %meta.uuid, rows = rows.len(), "read rate table csv");
        Ok((headers, rows))
    }
}

/// Concatenate nested header labels with a separator.
fn flatten_headers(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|h| {
            h.split('\n')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" / ")
        })
        .collect()
}
