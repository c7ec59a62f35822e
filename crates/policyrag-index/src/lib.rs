//! Offline ingestion pipeline.
//!
//! [`IndexerService`] drives one document through the full chain:
//!
//! ```text
//! VERIFIED gate → parse → rate-table split → Markdown → chunk → enrich
//!              → embed → dense upsert → sparse rebuild
//! ```
//!
//! Chunks are created in bulk when a document transitions to VERIFIED and a
//! rebuild is requested; re-ingesting a document deletes its chunks by
//! `document_id` and inserts fresh ones. Per-document failures leave the
//! document PENDING with reviewer notes and never abort a batch.

use policyrag_chunker::{ChunkDraft, ChunkerConfig, MarkdownChunker, MetadataEnricher};
use policyrag_core::{
    Catalog, DocumentParser, Error, MetadataFilter, MetadataValue, PolicyChunk, PolicyDocument,
    Product, Result, SparseIndex, VectorStore, VerificationStatus,
};
use policyrag_embed::EmbedderPool;
use policyrag_parser::{Converter, TableExporter};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// ENABLE_TABLE_SEPARATION: when false, rate tables stay inline.
    pub table_separation: bool,
    /// Where rate-table CSV sidecars land.
    pub table_export_dir: PathBuf,
    /// Where generated Markdown lands ({processed_dir}/{document_id}.md).
    pub processed_dir: PathBuf,
}

impl IndexerConfig {
    #[must_use]
    pub fn new(table_export_dir: PathBuf, processed_dir: PathBuf) -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            table_separation: true,
            table_export_dir,
            processed_dir,
        }
    }
}

/// Outcome of indexing one document.
#[derive(Debug)]
pub struct IndexReport {
    pub document_id: Uuid,
    pub chunk_count: u32,
    pub rate_table_count: usize,
}

/// Outcome of a batch reindex. Failures are per-document.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub indexed: Vec<IndexReport>,
    pub failed: Vec<(Uuid, String)>,
}

/// The ingestion pipeline service.
pub struct IndexerService {
    catalog: Arc<dyn Catalog>,
    parser: Arc<dyn DocumentParser>,
    chunker: MarkdownChunker,
    enricher: MetadataEnricher,
    embedder: Arc<EmbedderPool>,
    store: Arc<dyn VectorStore>,
    sparse: Arc<dyn SparseIndex>,
    config: IndexerConfig,
}

impl IndexerService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        parser: Arc<dyn DocumentParser>,
        embedder: Arc<EmbedderPool>,
        store: Arc<dyn VectorStore>,
        sparse: Arc<dyn SparseIndex>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            catalog,
            parser,
            chunker: MarkdownChunker::new(config.chunker.clone()),
            enricher: MetadataEnricher::new(),
            embedder,
            store,
            sparse,
            config,
        }
    }

    /// Index one VERIFIED document end to end.
    pub async fn index_document(&self, document_id: &Uuid) -> Result<IndexReport> {
        let document = self
            .catalog
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("unknown document {document_id}")))?;

        if !document.is_indexable() {
            return Err(Error::Internal(format!(
                "document {document_id} is {:?}, only VERIFIED documents may be indexed",
                document.verification_status
            )));
        }

        let product = self
            .catalog
            .get_product(&document.product_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("unknown product {}", document.product_id)))?;

        info!(
            document = %document_id,
            product = %product.product_code,
            "indexing {}",
            document.filename
        );

        match self.run_pipeline(&document, &product).await {
            Ok(report) => Ok(report),
            Err(e) => {
                // Parse and pipeline failures leave the document back in
                // PENDING with the reason recorded for the reviewer.
                error!(document = %document_id, "indexing failed: {e}");
                let note = format!("indexing failed: {e}");
                if let Err(update_err) = self
                    .catalog
                    .set_verification(document_id, VerificationStatus::Pending, Some(note))
                    .await
                {
                    warn!("could not record failure note: {update_err}");
                }
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        document: &PolicyDocument,
        product: &Product,
    ) -> Result<IndexReport> {
        // 1. Parse.
        let parsed = self.parser.parse(&document.local_path).await?;

        // 2. Split rate tables, render Markdown, post-process.
        let converter = Converter::new(
            TableExporter::new(&self.config.table_export_dir),
            self.config.table_separation,
        );
        let converted = converter.convert(
            &parsed,
            &product.product_code,
            &document.local_path.to_string_lossy(),
        )?;

        // 3. Persist the generated Markdown.
        tokio::fs::create_dir_all(&self.config.processed_dir).await?;
        let md_path = self.config.processed_dir.join(format!("{}.md", document.id));
        tokio::fs::write(&md_path, &converted.markdown).await?;

        // 4. Chunk and enrich.
        let drafts = self.chunker.chunk(&converted.markdown)?;
        if drafts.is_empty() {
            return Err(Error::Internal(format!(
                "document {} produced no chunks",
                document.id
            )));
        }
        let mut chunks: Vec<PolicyChunk> = drafts
            .into_iter()
            .map(|draft| self.build_chunk(draft, document, product))
            .collect();

        // 5. Embed.
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }

        // 6. Replace this document's chunks in the dense store.
        let mut own_filter = MetadataFilter::new();
        own_filter.insert(
            "document_id".to_string(),
            MetadataValue::Str(document.id.to_string()),
        );
        self.store.delete_where(&own_filter).await?;
        self.store.upsert(&chunks).await?;

        // 7. Rebuild the sparse index over the full dense id set, so both
        // indices expose the same chunks. On failure, pull this document
        // back out of the dense store so the id sets still agree.
        if let Err(sparse_err) = self.rebuild_sparse().await {
            warn!("sparse rebuild failed, rolling back document: {sparse_err}");
            self.store.delete_where(&own_filter).await?;
            self.rebuild_sparse().await?;
            return Err(sparse_err);
        }

        // 8. Refresh file provenance.
        let mut updated = document.clone();
        if let Ok(bytes) = tokio::fs::read(&document.local_path).await {
            updated.file_hash = Some(format!("{:x}", Sha256::digest(&bytes)));
            updated.file_size = Some(bytes.len() as u64);
        }
        self.catalog.upsert_document(&updated).await?;

        info!(
            document = %document.id,
            chunks = chunks.len(),
            rate_tables = converted.rate_tables.len(),
            "indexed"
        );

        Ok(IndexReport {
            document_id: document.id,
            chunk_count: chunks.len() as u32,
            rate_table_count: converted.rate_tables.len(),
        })
    }

    /// Rebuild the sparse index from everything currently in the dense store.
    async fn rebuild_sparse(&self) -> Result<()> {
        let ids = self.store.ids().await?;
        let mut all = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = self.store.get(&id).await? {
                all.push(chunk);
            }
        }
        self.sparse.build(&all).await?;
        Ok(())
    }

    /// Turn a draft into a full chunk with product context and enrichment.
    fn build_chunk(
        &self,
        draft: ChunkDraft,
        document: &PolicyDocument,
        product: &Product,
    ) -> PolicyChunk {
        let category = self.enricher.classify_category(&draft.content);
        let entity_role = self.enricher.identify_entity_role(&draft.content);
        let keywords = self.enricher.extract_keywords(&draft.content);
        let section_id = self.enricher.extract_section_id(&draft.section_title);
        let parent_section = section_id
            .as_deref()
            .and_then(|sid| self.enricher.parent_section(sid));

        PolicyChunk {
            id: PolicyChunk::make_id(&document.id, draft.chunk_index),
            document_id: document.id,
            chunk_index: draft.chunk_index,
            content: draft.content,
            company: product.company.clone(),
            product_code: product.product_code.clone(),
            product_name: product.name.clone(),
            doc_type: document.doc_type,
            section_id,
            section_title: draft.section_title,
            parent_section,
            level: draft.level.clamp(1, 5),
            section_path: draft.section_path,
            page_number: None,
            category,
            entity_role,
            keywords,
            is_table: draft.is_table,
            table_data: draft.table_data,
            table_refs: draft.table_refs,
            embedding: None,
        }
    }

    /// Reindex every VERIFIED document of every product. Failures are
    /// collected, not fatal.
    pub async fn reindex_all(&self) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for product in self.catalog.list_products(None).await? {
            for document in self.catalog.list_documents(&product.id).await? {
                if !document.is_indexable() {
                    continue;
                }
                match self.index_document(&document.id).await {
                    Ok(doc_report) => report.indexed.push(doc_report),
                    Err(e) => report.failed.push((document.id, e.to_string())),
                }
            }
        }
        info!(
            indexed = report.indexed.len(),
            failed = report.failed.len(),
            "batch reindex finished"
        );
        Ok(report)
    }

    /// Remove a document's chunks from both indices and garbage-collect its
    /// rate-table sidecars. Sidecars outlive chunks otherwise.
    pub async fn remove_document(&self, document_id: &Uuid) -> Result<u64> {
        let mut filter = MetadataFilter::new();
        filter.insert(
            "document_id".to_string(),
            MetadataValue::Str(document_id.to_string()),
        );
        let deleted = self.store.delete_where(&filter).await?;
        self.rebuild_sparse().await?;

        if let Some(document) = self.catalog.get_document(document_id).await? {
            let exporter = TableExporter::new(&self.config.table_export_dir);
            let source = document.local_path.to_string_lossy();
            let removed = exporter.remove_by_source(&source)?;
            if removed > 0 {
                info!(document = %document_id, removed, "collected rate-table sidecars");
            }
        }
        Ok(deleted)
    }
}
