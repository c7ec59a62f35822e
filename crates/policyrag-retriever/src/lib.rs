//! Hybrid retrieval: dense vectors and BM25, fused by reciprocal rank.
//!
//! Queries route to weight pairs by shape: clause-number lookups lean on
//! BM25, natural-language questions lean on the dense side. Both sides then
//! run concurrently, get pruned, and fuse via RRF. The retriever never
//! silently substitutes degraded results: a one-sided response carries a
//! marker, and when both sides fail the call errors.

mod fusion;
mod routing;

pub use fusion::{fuse, FusionInput};
pub use routing::{route_query, QueryKind};

use policyrag_core::{
    DenseHit, Embedder, PolicyChunk, RetrieveError, RetrievedChunk, SearchFilters, SparseHit,
    SparseIndex, VectorStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Retrieval knobs. Every tuned constant lives here.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// RRF smoothing constant.
    pub rrf_k: f32,
    /// (sparse, dense) weights for clause-number / digit-heavy queries.
    pub numeric_weights: (f32, f32),
    /// (sparse, dense) weights for question-like queries.
    pub question_weights: (f32, f32),
    /// (sparse, dense) weights otherwise.
    pub default_weights: (f32, f32),
    /// Dense similarity floor applied before fusion.
    pub min_similarity: f32,
    /// Stricter floor used by the exclusion-check tool.
    pub exclusion_min_similarity: f32,
    /// Ambient deadline per side.
    pub deadline: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            numeric_weights: (0.8, 0.2),
            question_weights: (0.2, 0.8),
            default_weights: (0.4, 0.6),
            min_similarity: 0.7,
            exclusion_min_similarity: 0.75,
            deadline: Duration::from_secs(10),
        }
    }
}

/// One retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub filters: SearchFilters,
    pub top_k: usize,
    /// Overrides the configured similarity floor. Negative disables pruning.
    pub min_similarity: Option<f32>,
}

impl RetrievalRequest {
    #[must_use]
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            filters: SearchFilters::default(),
            top_k,
            min_similarity: None,
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_min_similarity(mut self, floor: f32) -> Self {
        self.min_similarity = Some(floor);
        self
    }
}

/// Fused, ranked retrieval output.
#[derive(Debug)]
pub struct RetrievalOutcome {
    pub chunks: Vec<RetrievedChunk>,
    /// Set when one side was unavailable; surfaced in tool summaries.
    pub degraded: Option<String>,
    /// (sparse, dense) weights the query routed to.
    pub weights: (f32, f32),
}

/// Hybrid retriever over a shared dense store and sparse index.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    sparse: Arc<dyn SparseIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        sparse: Arc<dyn SparseIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            sparse,
            embedder,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Run one hybrid retrieval.
    pub async fn search(
        &self,
        request: &RetrievalRequest,
    ) -> Result<RetrievalOutcome, policyrag_core::Error> {
        let kind = route_query(&request.query);
        let weights = match kind {
            QueryKind::Numeric => self.config.numeric_weights,
            QueryKind::Question => self.config.question_weights,
            QueryKind::Statement => self.config.default_weights,
        };
        debug!(query = %request.query, ?kind, ?weights, "routing query");

        let fetch_k = request.top_k.max(1) * 2;
        let filter = request.filters.to_metadata_filter();
        let metadata_filter = (!filter.is_empty()).then_some(filter);

        // Both sides run concurrently; each honors the ambient deadline.
        let dense_fut = async {
            let embedding = self
                .embedder
                .embed(&request.query)
                .await
                .map_err(policyrag_core::Error::Embed)?;
            self.store
                .query(&embedding, fetch_k, metadata_filter.as_ref())
                .await
                .map_err(policyrag_core::Error::Store)
        };
        let sparse_fut = async {
            self.sparse
                .search(&request.query, fetch_k)
                .await
                .map_err(policyrag_core::Error::Store)
        };

        let (dense_res, sparse_res) = tokio::join!(
            timeout(self.config.deadline, dense_fut),
            timeout(self.config.deadline, sparse_fut),
        );

        let dense_res: Result<Vec<DenseHit>, String> = match dense_res {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("deadline {}ms exceeded", self.config.deadline.as_millis())),
        };
        let sparse_res: Result<Vec<SparseHit>, String> = match sparse_res {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("deadline {}ms exceeded", self.config.deadline.as_millis())),
        };

        let (dense_hits, sparse_hits, degraded) = match (dense_res, sparse_res) {
            (Ok(dense), Ok(sparse)) => (dense, sparse, None),
            (Ok(dense), Err(sparse_err)) => {
                warn!("sparse side unavailable: {sparse_err}");
                (dense, Vec::new(), Some(format!("sparse side unavailable: {sparse_err}")))
            }
            (Err(dense_err), Ok(sparse)) => {
                warn!("dense side unavailable: {dense_err}");
                (Vec::new(), sparse, Some(format!("dense side unavailable: {dense_err}")))
            }
            (Err(dense), Err(sparse)) => {
                if dense.contains("deadline") && sparse.contains("deadline") {
                    return Err(RetrieveError::Timeout(self.config.deadline.as_millis()).into());
                }
                return Err(RetrieveError::BothSidesFailed { dense, sparse }.into());
            }
        };

        // Similarity floor prunes dense candidates before fusion.
        let floor = request.min_similarity.unwrap_or(self.config.min_similarity);
        let had_dense = !dense_hits.is_empty();
        let dense_hits: Vec<DenseHit> = dense_hits
            .into_iter()
            .filter(|hit| floor < 0.0 || hit.similarity >= floor)
            .collect();

        // A question-like query with every dense candidate below the floor
        // returns empty rather than feeding weak matches downstream.
        if kind == QueryKind::Question && had_dense && dense_hits.is_empty() {
            debug!("all dense candidates below floor {floor}; returning empty");
            return Ok(RetrievalOutcome {
                chunks: Vec::new(),
                degraded,
                weights,
            });
        }

        // Sparse results don't see the store-side filter; apply it post-hoc
        // and resolve surviving ids to chunks.
        let mut resolved: Vec<(SparseHit, PolicyChunk)> = Vec::new();
        for hit in sparse_hits {
            let Some(chunk) = self.store.get(&hit.id).await.map_err(policyrag_core::Error::Store)?
            else {
                continue;
            };
            if let Some(ref filter) = metadata_filter {
                if !policyrag_core::matches_filter(&chunk.to_metadata(), filter) {
                    continue;
                }
            }
            resolved.push((hit, chunk));
        }

        let fused = fuse(
            FusionInput {
                dense: &dense_hits,
                sparse: &resolved,
                sparse_weight: weights.0,
                dense_weight: weights.1,
                rrf_k: self.config.rrf_k,
            },
            request.top_k,
        );

        Ok(RetrievalOutcome {
            chunks: fused,
            degraded,
            weights,
        })
    }
}
