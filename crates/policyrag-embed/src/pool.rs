//! Embedder pool with bounded concurrency.

use policyrag_core::{EmbedError, Embedder};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Wraps an embedder with a semaphore so inference parallelism stays bounded,
/// and splits large inputs into batches.
pub struct EmbedderPool {
    embedder: Arc<dyn Embedder>,
    semaphore: Semaphore,
    batch_size: usize,
}

impl EmbedderPool {
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrent: usize, batch_size: usize) -> Self {
        Self {
            embedder,
            semaphore: Semaphore::new(max_concurrent.max(1)),
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Embed all texts, `batch_size` at a time.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| EmbedError::Inference(format!("semaphore error: {e}")))?;
            debug!("embedding batch of {}", batch.len());
            results.extend(self.embedder.embed_batch(batch).await?);
        }
        Ok(results)
    }

    /// Embed one query string.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EmbedError::Inference(format!("semaphore error: {e}")))?;
        self.embedder.embed(query).await
    }
}
