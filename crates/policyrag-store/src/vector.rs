//! Persistent dense vector store with filtered cosine KNN.

use async_trait::async_trait;
use policyrag_core::{
    matches_filter, DenseHit, MetadataFilter, MetadataValue, PolicyChunk, StoreError, StoreStats,
    VectorStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    content: String,
    metadata: HashMap<String, MetadataValue>,
    vector: Vec<f32>,
}

/// On-disk snapshot shape. The embedding model identity travels with the
/// data so an incompatible query embedder is refused at open time.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    embed_model: String,
    dimension: usize,
    records: HashMap<String, Record>,
}

/// Brute-force cosine store, persisted as a JSON snapshot.
///
/// Suited to corpora of tens of thousands of clauses. The snapshot format is
/// an implementation detail; swap-on-success persistence is what reindex
/// atomicity rests on.
#[derive(Debug)]
pub struct LocalVectorStore {
    embed_model: String,
    dimension: usize,
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, Record>>,
}

impl LocalVectorStore {
    /// In-memory store (tests, dry runs).
    #[must_use]
    pub fn in_memory(embed_model: &str, dimension: usize) -> Self {
        Self {
            embed_model: embed_model.to_string(),
            dimension,
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or create) a snapshot-backed store.
    ///
    /// An existing snapshot whose model identity or dimension disagrees with
    /// the configured embedder is refused with
    /// [`StoreError::IndexMismatch`] rather than silently re-embedded.
    pub fn open(
        path: impl Into<PathBuf>,
        embed_model: &str,
        dimension: usize,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Init(format!("snapshot read failed: {e}")))?;
            let snapshot: Snapshot = serde_json::from_str(&json)
                .map_err(|e| StoreError::Init(format!("snapshot decode failed: {e}")))?;
            if snapshot.embed_model != embed_model || snapshot.dimension != dimension {
                return Err(StoreError::IndexMismatch {
                    query_model: embed_model.to_string(),
                    query_dim: dimension,
                    index_model: snapshot.embed_model,
                    index_dim: snapshot.dimension,
                });
            }
            info!(
                "opened vector store: {} records ({embed_model}/{dimension})",
                snapshot.records.len()
            );
            snapshot.records
        } else {
            HashMap::new()
        };

        Ok(Self {
            embed_model: embed_model.to_string(),
            dimension,
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// Write the snapshot to a temp file, then rename over the live one.
    async fn persist(&self, records: &HashMap<String, Record>) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persist(format!("mkdir failed: {e}")))?;
        }
        let snapshot = Snapshot {
            embed_model: self.embed_model.clone(),
            dimension: self.dimension,
            records: records.clone(),
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| StoreError::Persist(format!("encode failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::Persist(format!("write failed: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StoreError::Persist(format!("rename failed: {e}")))?;
        Ok(())
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, chunks: &[PolicyChunk]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for chunk in chunks {
            let Some(ref vector) = chunk.embedding else {
                return Err(StoreError::Insert(format!(
                    "chunk {} has no embedding",
                    chunk.id
                )));
            };
            if vector.len() != self.dimension {
                return Err(StoreError::IndexMismatch {
                    query_model: self.embed_model.clone(),
                    query_dim: vector.len(),
                    index_model: self.embed_model.clone(),
                    index_dim: self.dimension,
                });
            }
            records.insert(
                chunk.id.clone(),
                Record {
                    content: chunk.content.clone(),
                    metadata: chunk.to_metadata(),
                    vector: vector.clone(),
                },
            );
        }
        debug!("upserted {} chunks", chunks.len());
        self.persist(&records).await
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !matches_filter(&record.metadata, filter));
        let deleted = (before - records.len()) as u64;
        self.persist(&records).await?;
        debug!("deleted {deleted} chunks");
        Ok(deleted)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DenseHit>, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::IndexMismatch {
                query_model: self.embed_model.clone(),
                query_dim: vector.len(),
                index_model: self.embed_model.clone(),
                index_dim: self.dimension,
            });
        }

        let records = self.records.read().await;
        let mut hits: Vec<DenseHit> = records
            .iter()
            .filter(|(_, record)| {
                filter.is_none_or(|f| matches_filter(&record.metadata, f))
            })
            .map(|(id, record)| DenseHit {
                id: id.clone(),
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                similarity: Self::cosine(vector, &record.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<PolicyChunk>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(id)
            .map(|record| PolicyChunk::from_metadata(id, &record.content, &record.metadata)))
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().await;
        Ok(records.keys().cloned().collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let records = self.records.read().await;
        Ok(StoreStats {
            total_chunks: records.len() as u64,
            dimension: self.dimension,
            metric: "cosine".to_string(),
            embed_model: self.embed_model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policyrag_core::{ClauseCategory, DocType};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn chunk(id_index: u32, category: ClauseCategory, vector: Vec<f32>) -> PolicyChunk {
        let document_id = Uuid::nil();
        PolicyChunk {
            id: PolicyChunk::make_id(&document_id, id_index),
            document_id,
            chunk_index: id_index,
            content: format!("条款内容 {id_index}"),
            company: "平安人寿".to_string(),
            product_code: "C1".to_string(),
            product_name: "福耀年金".to_string(),
            doc_type: DocType::Clause,
            section_id: None,
            section_title: format!("标题{id_index}"),
            parent_section: None,
            level: 1,
            section_path: "根".to_string(),
            page_number: None,
            category,
            entity_role: None,
            keywords: vec![],
            is_table: false,
            table_data: None,
            table_refs: vec![],
            embedding: Some(vector),
        }
    }

    #[tokio::test]
    async fn test_upsert_query_roundtrip() {
        let store = LocalVectorStore::in_memory("test", 3);
        store
            .upsert(&[
                chunk(0, ClauseCategory::Liability, vec![1.0, 0.0, 0.0]),
                chunk(1, ClauseCategory::Exclusion, vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, PolicyChunk::make_id(&Uuid::nil(), 0));
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let store = LocalVectorStore::in_memory("test", 3);
        store
            .upsert(&[
                chunk(0, ClauseCategory::Liability, vec![1.0, 0.0, 0.0]),
                chunk(1, ClauseCategory::Exclusion, vec![0.9, 0.1, 0.0]),
            ])
            .await
            .unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert(
            "category".to_string(),
            MetadataValue::Str("Exclusion".to_string()),
        );
        let hits = store.query(&[1.0, 0.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].metadata.get("category"),
            Some(&MetadataValue::Str("Exclusion".to_string()))
        );
    }

    #[tokio::test]
    async fn test_delete_where_document_id() {
        let store = LocalVectorStore::in_memory("test", 3);
        store
            .upsert(&[
                chunk(0, ClauseCategory::General, vec![1.0, 0.0, 0.0]),
                chunk(1, ClauseCategory::General, vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert(
            "document_id".to_string(),
            MetadataValue::Str(Uuid::nil().to_string()),
        );
        let deleted = store.delete_where(&filter).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_refused() {
        let store = LocalVectorStore::in_memory("test", 3);
        let err = store.query(&[1.0, 0.0], 1, None).await.unwrap_err();
        assert!(matches!(err, StoreError::IndexMismatch { .. }));
    }

    #[tokio::test]
    async fn test_upsert_without_embedding_refused() {
        let store = LocalVectorStore::in_memory("test", 3);
        let mut bad = chunk(0, ClauseCategory::General, vec![]);
        bad.embedding = None;
        assert!(store.upsert(&[bad]).await.is_err());
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vector_store").join("dense.json");

        {
            let store = LocalVectorStore::open(&path, "test", 3).unwrap();
            store
                .upsert(&[chunk(0, ClauseCategory::Liability, vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let reopened = LocalVectorStore::open(&path, "test", 3).unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.metric, "cosine");

        let restored = reopened
            .get(&PolicyChunk::make_id(&Uuid::nil(), 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.company, "平安人寿");
        assert_eq!(restored.category, ClauseCategory::Liability);
        assert!(restored.embedding.is_none());
    }

    #[tokio::test]
    async fn test_open_refuses_model_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dense.json");

        {
            let store = LocalVectorStore::open(&path, "model-a", 3).unwrap();
            store
                .upsert(&[chunk(0, ClauseCategory::General, vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let err = LocalVectorStore::open(&path, "model-b", 3).unwrap_err();
        assert!(matches!(err, StoreError::IndexMismatch { .. }));
        let err = LocalVectorStore::open(&path, "model-a", 512).unwrap_err();
        assert!(matches!(err, StoreError::IndexMismatch { .. }));
    }
}
