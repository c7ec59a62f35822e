//! Product and PolicyDocument catalog.
//!
//! Read-mostly: the online path only queries it for product lookup and
//! provenance; writes come from the offline discovery/ingestion path. A
//! JSON snapshot with atomic rename carries the records; a relational
//! backend can replace it behind the same trait.

use async_trait::async_trait;
use policyrag_core::{Catalog, PolicyDocument, Product, StoreError, VerificationStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    products: HashMap<Uuid, Product>,
    documents: HashMap<Uuid, PolicyDocument>,
}

/// JSON-backed catalog.
pub struct JsonCatalog {
    path: Option<PathBuf>,
    state: RwLock<State>,
}

impl JsonCatalog {
    /// In-memory catalog.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(State::default()),
        }
    }

    /// Open (or create) a file-backed catalog.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Init(format!("catalog read failed: {e}")))?;
            let state: State = serde_json::from_str(&json)
                .map_err(|e| StoreError::Init(format!("catalog decode failed: {e}")))?;
            info!(
                "opened catalog: {} products, {} documents",
                state.products.len(),
                state.documents.len()
            );
            state
        } else {
            State::default()
        };
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    async fn persist(&self, state: &State) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persist(format!("mkdir failed: {e}")))?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Persist(format!("catalog encode failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| StoreError::Persist(format!("catalog write failed: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StoreError::Persist(format!("catalog rename failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for JsonCatalog {
    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.products.insert(product.id, product.clone());
        self.persist(&state).await
    }

    async fn get_product(&self, id: &Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.state.read().await.products.get(id).cloned())
    }

    async fn get_product_by_code(
        &self,
        product_code: &str,
    ) -> Result<Option<Product>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .products
            .values()
            .find(|p| p.product_code == product_code)
            .cloned())
    }

    async fn list_products(&self, company: Option<&str>) -> Result<Vec<Product>, StoreError> {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| company.is_none_or(|c| p.company == c))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.product_code.cmp(&b.product_code));
        Ok(products)
    }

    async fn upsert_document(&self, document: &PolicyDocument) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.documents.insert(document.id, document.clone());
        self.persist(&state).await
    }

    async fn get_document(&self, id: &Uuid) -> Result<Option<PolicyDocument>, StoreError> {
        Ok(self.state.read().await.documents.get(id).cloned())
    }

    async fn list_documents(
        &self,
        product_id: &Uuid,
    ) -> Result<Vec<PolicyDocument>, StoreError> {
        let state = self.state.read().await;
        let mut documents: Vec<PolicyDocument> = state
            .documents
            .values()
            .filter(|d| d.product_id == *product_id)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.filename.clone());
        Ok(documents)
    }

    async fn set_verification(
        &self,
        id: &Uuid,
        status: VerificationStatus,
        reviewer_notes: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::Query(format!("unknown document {id}")))?;
        debug!(
            "document {id}: {:?} → {:?}",
            document.verification_status, status
        );
        document.verification_status = status;
        document.reviewer_notes = reviewer_notes;
        self.persist(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use policyrag_core::DocType;
    use tempfile::tempdir;

    fn product(code: &str, name: &str, company: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            product_code: code.to_string(),
            name: name.to_string(),
            company: company.to_string(),
            category: Some("年金保险".to_string()),
            publish_time: Some("2021-06".to_string()),
            created_at: Utc::now(),
        }
    }

    fn document(product_id: Uuid) -> PolicyDocument {
        PolicyDocument {
            id: Uuid::new_v4(),
            product_id,
            doc_type: DocType::Clause,
            filename: "产品条款.pdf".to_string(),
            local_path: "raw/平安人寿/C1/产品条款.pdf".into(),
            source_url: Some("https://life.pingan.com/x.pdf".to_string()),
            file_hash: None,
            file_size: None,
            downloaded_at: None,
            verification_status: VerificationStatus::Pending,
            reviewer_notes: None,
            pdf_links: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_product_lookup_by_code() {
        let catalog = JsonCatalog::in_memory();
        let p = product("C000120322", "平安福耀年金保险", "平安人寿");
        catalog.upsert_product(&p).await.unwrap();

        let found = catalog.get_product_by_code("C000120322").await.unwrap();
        assert_eq!(found.unwrap().name, "平安福耀年金保险");
        assert!(catalog.get_product_by_code("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_products_company_filter() {
        let catalog = JsonCatalog::in_memory();
        catalog
            .upsert_product(&product("C1", "福耀年金", "平安人寿"))
            .await
            .unwrap();
        catalog
            .upsert_product(&product("C2", "国寿鑫享", "中国人寿"))
            .await
            .unwrap();

        assert_eq!(catalog.list_products(None).await.unwrap().len(), 2);
        let pingan = catalog.list_products(Some("平安人寿")).await.unwrap();
        assert_eq!(pingan.len(), 1);
        assert_eq!(pingan[0].product_code, "C1");
    }

    #[tokio::test]
    async fn test_verification_transitions() {
        let catalog = JsonCatalog::in_memory();
        let p = product("C1", "福耀年金", "平安人寿");
        catalog.upsert_product(&p).await.unwrap();
        let d = document(p.id);
        catalog.upsert_document(&d).await.unwrap();

        catalog
            .set_verification(&d.id, VerificationStatus::Verified, None)
            .await
            .unwrap();
        let stored = catalog.get_document(&d.id).await.unwrap().unwrap();
        assert!(stored.is_indexable());

        catalog
            .set_verification(
                &d.id,
                VerificationStatus::Rejected,
                Some("表格缺列".to_string()),
            )
            .await
            .unwrap();
        let stored = catalog.get_document(&d.id).await.unwrap().unwrap();
        assert!(!stored.is_indexable());
        assert_eq!(stored.reviewer_notes.as_deref(), Some("表格缺列"));
    }

    #[tokio::test]
    async fn test_set_verification_unknown_document() {
        let catalog = JsonCatalog::in_memory();
        let err = catalog
            .set_verification(&Uuid::new_v4(), VerificationStatus::Verified, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").join("catalog.json");

        let p = product("C1", "福耀年金", "平安人寿");
        {
            let catalog = JsonCatalog::open(&path).unwrap();
            catalog.upsert_product(&p).await.unwrap();
            catalog.upsert_document(&document(p.id)).await.unwrap();
        }

        let reopened = JsonCatalog::open(&path).unwrap();
        assert_eq!(reopened.list_products(None).await.unwrap().len(), 1);
        assert_eq!(reopened.list_documents(&p.id).await.unwrap().len(), 1);
    }
}
