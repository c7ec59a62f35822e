//! # policyrag CLI
//!
//! Command-line entry point for the insurance clause retrieval service.
//!
//! ## Commands
//!
//! - `policyrag ingest <PDF> --company … --product-code … --product-name …`
//!   registers a document (PENDING until reviewed)
//! - `policyrag verify <DOCUMENT_ID> --status verified` records the human
//!   review decision
//! - `policyrag index <DOCUMENT_ID>` / `policyrag reindex` builds the indices
//! - `policyrag query <QUERY>` runs a hybrid retrieval
//! - `policyrag tool <NAME> <ARGUMENTS_JSON>` invokes one of the MCP tools
//! - `policyrag status` prints index and limiter statistics
//!
//! All configuration keys are environment-driven; see `config.rs`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use policyrag_core::{
    Catalog, DocType, Embedder, PolicyDocument, Product, SparseIndex, VectorStore,
    VerificationStatus,
};
use policyrag_embed::{EmbedderPool, HashingEmbedder};
use policyrag_index::{IndexerConfig, IndexerService};
use policyrag_limiter::RateLimiter;
use policyrag_parser::PdfDocumentParser;
use policyrag_retriever::{HybridRetriever, RetrievalRequest, RetrieverConfig};
use policyrag_store::{Bm25Index, JsonCatalog, LocalVectorStore};
use policyrag_tools::{PolicyTools, ToolRequest};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

mod config;

use config::ConfigArgs;

#[derive(Parser)]
#[command(name = "policyrag")]
#[command(about = "Retrieval service for Chinese insurance policy documents")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a downloaded PDF (stays PENDING until reviewed)
    Ingest {
        /// Path to the PDF
        pdf: PathBuf,

        #[arg(long)]
        company: String,

        #[arg(long)]
        product_code: String,

        #[arg(long)]
        product_name: String,

        /// clause / manual / rate-table
        #[arg(long, default_value = "clause")]
        doc_type: String,

        /// Original download URL, kept for provenance
        #[arg(long)]
        source_url: Option<String>,
    },

    /// Record a review decision for a document
    Verify {
        document_id: Uuid,

        /// verified / rejected / pending
        #[arg(long)]
        status: String,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Index one VERIFIED document
    Index { document_id: Uuid },

    /// Rebuild the indices over every VERIFIED document
    Reindex,

    /// Run a hybrid retrieval
    Query {
        query: String,

        #[arg(long, default_value_t = 5)]
        top_k: usize,

        #[arg(long)]
        company: Option<String>,

        #[arg(long)]
        product_code: Option<String>,

        /// Dense similarity floor; negative disables pruning
        #[arg(long, default_value_t = -1.0)]
        min_similarity: f32,
    },

    /// Invoke one retrieval tool with JSON arguments
    Tool {
        /// search_policy_clause / check_exclusion_risk /
        /// calculate_surrender_value_logic / lookup_product
        name: String,

        /// Tool arguments as a JSON object
        arguments: String,
    },

    /// Print catalog, index, and limiter statistics
    Status,
}

/// Shared wiring for every command.
struct App {
    catalog: Arc<JsonCatalog>,
    store: Arc<LocalVectorStore>,
    retriever: Arc<HybridRetriever>,
    tools: PolicyTools,
    indexer: IndexerService,
    limiter: RateLimiter,
}

fn build_embedder(model_id: &str) -> Result<Arc<dyn Embedder>> {
    match model_id {
        "feature-hash-v1" => Ok(Arc::new(HashingEmbedder::new())),
        #[cfg(feature = "candle")]
        "BAAI/bge-small-zh-v1.5" => Ok(Arc::new(policyrag_embed::CandleEmbedder::new())),
        other => bail!(
            "unknown EMBED_MODEL_ID '{other}' (available: feature-hash-v1{})",
            if cfg!(feature = "candle") {
                ", BAAI/bge-small-zh-v1.5"
            } else {
                ""
            }
        ),
    }
}

fn build_app(config: &ConfigArgs) -> Result<App> {
    let embedder = build_embedder(&config.embed_model_id)?;

    let catalog = Arc::new(JsonCatalog::open(config.catalog_path())?);
    let store = Arc::new(LocalVectorStore::open(
        config.vector_store_path(),
        embedder.model_name(),
        embedder.dimension(),
    )?);
    let sparse = Arc::new(Bm25Index::open(config.bm25_index_path())?);

    let retriever = Arc::new(HybridRetriever::new(
        Arc::clone(&store) as Arc<dyn VectorStore>,
        Arc::clone(&sparse) as Arc<dyn SparseIndex>,
        Arc::clone(&embedder),
        RetrieverConfig::default(),
    ));

    let tools = PolicyTools::new(
        Arc::clone(&retriever),
        Arc::clone(&catalog) as Arc<dyn Catalog>,
    );

    let mut indexer_config =
        IndexerConfig::new(config.table_export_dir(), config.processed_dir());
    indexer_config.table_separation = config.enable_table_separation;

    let indexer = IndexerService::new(
        Arc::clone(&catalog) as Arc<dyn Catalog>,
        Arc::new(PdfDocumentParser::new()),
        Arc::new(EmbedderPool::new(embedder, 2, 32)),
        Arc::clone(&store) as Arc<dyn VectorStore>,
        sparse as Arc<dyn SparseIndex>,
        indexer_config,
    );

    let limiter = RateLimiter::new(config.limiter_config());

    Ok(App {
        catalog,
        store,
        retriever,
        tools,
        indexer,
        limiter,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let app = build_app(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            pdf,
            company,
            product_code,
            product_name,
            doc_type,
            source_url,
        } => {
            let doc_type = DocType::parse(&doc_type)
                .with_context(|| format!("unknown doc_type '{doc_type}'"))?;

            let product = match app.catalog.get_product_by_code(&product_code).await? {
                Some(existing) => existing,
                None => {
                    let product = Product {
                        id: Uuid::new_v4(),
                        product_code: product_code.clone(),
                        name: product_name,
                        company,
                        category: None,
                        publish_time: None,
                        created_at: chrono::Utc::now(),
                    };
                    app.catalog.upsert_product(&product).await?;
                    product
                }
            };

            let document = PolicyDocument {
                id: Uuid::new_v4(),
                product_id: product.id,
                doc_type,
                filename: pdf
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                local_path: pdf,
                source_url,
                file_hash: None,
                file_size: None,
                downloaded_at: Some(chrono::Utc::now()),
                verification_status: VerificationStatus::Pending,
                reviewer_notes: None,
                pdf_links: HashMap::new(),
            };
            app.catalog.upsert_document(&document).await?;
            println!(
                "registered document {} for {} (PENDING review)",
                document.id, product.product_code
            );
        }

        Commands::Verify {
            document_id,
            status,
            notes,
        } => {
            let status = match status.to_lowercase().as_str() {
                "verified" => VerificationStatus::Verified,
                "rejected" => VerificationStatus::Rejected,
                "pending" => VerificationStatus::Pending,
                other => bail!("unknown status '{other}'"),
            };
            app.catalog
                .set_verification(&document_id, status, notes)
                .await?;
            println!("document {document_id} → {status:?}");
        }

        Commands::Index { document_id } => {
            let report = app.indexer.index_document(&document_id).await?;
            println!(
                "indexed {}: {} chunks, {} rate tables",
                report.document_id, report.chunk_count, report.rate_table_count
            );
        }

        Commands::Reindex => {
            let report = app.indexer.reindex_all().await?;
            for indexed in &report.indexed {
                println!("indexed {}: {} chunks", indexed.document_id, indexed.chunk_count);
            }
            for (document_id, error) in &report.failed {
                eprintln!("failed {document_id}: {error}");
            }
        }

        Commands::Query {
            query,
            top_k,
            company,
            product_code,
            min_similarity,
        } => {
            let filters = policyrag_core::SearchFilters {
                company,
                product_code,
                ..Default::default()
            };
            let request = RetrievalRequest::new(query, top_k)
                .with_filters(filters)
                .with_min_similarity(min_similarity);
            let outcome = app.retriever.search(&request).await?;

            if let Some(marker) = &outcome.degraded {
                eprintln!("warning: {marker}");
            }
            for (rank, retrieved) in outcome.chunks.iter().enumerate() {
                println!(
                    "#{} [{}] {} (rrf={:.4}, sim={})",
                    rank + 1,
                    retrieved.chunk.section_id.as_deref().unwrap_or("-"),
                    retrieved.chunk.section_title,
                    retrieved.rrf_score,
                    retrieved
                        .similarity
                        .map(|s| format!("{s:.3}"))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        Commands::Tool { name, arguments } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&arguments).context("arguments must be a JSON object")?;
            let request = ToolRequest::parse(&name, arguments)
                .map_err(policyrag_core::Error::Tool)?;
            let response = app.tools.dispatch(request).await?;
            println!("{}", serde_json::to_string_pretty(&response.to_json())?);
        }

        Commands::Status => {
            let stats = app.store.stats().await?;
            let products = app.catalog.list_products(None).await?;
            println!(
                "catalog: {} products; dense index: {} chunks ({} dims, {}, model {})",
                products.len(),
                stats.total_chunks,
                stats.dimension,
                stats.metric,
                stats.embed_model,
            );
            let limiter = app.limiter.stats().await;
            println!(
                "limiter: {} requests, {} blocked, {} trips, {} domains ({} open)",
                limiter.total_requests,
                limiter.blocked_requests,
                limiter.circuit_trips,
                limiter.active_domains,
                limiter.open_breakers,
            );
        }
    }

    Ok(())
}
