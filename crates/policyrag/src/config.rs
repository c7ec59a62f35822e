//! Environment-driven configuration.
//!
//! Every knob is a clap argument backed by an environment variable, so the
//! service configures identically from a shell, a unit file, or a container
//! spec. Paths default to subdirectories of the data root.

use clap::Args;
use directories::ProjectDirs;
use policyrag_limiter::LimiterConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Recognized configuration keys.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Data root; holds raw/, processed/, assets/, vector_store/, db/
    #[arg(long, env = "POLICYRAG_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Global crawl QPS
    #[arg(long, env = "GLOBAL_QPS", default_value_t = 0.8)]
    pub global_qps: f64,

    /// Per-domain crawl QPS
    #[arg(long, env = "PER_DOMAIN_QPS", default_value_t = 0.8)]
    pub per_domain_qps: f64,

    /// Enable the per-domain circuit breaker
    #[arg(
        long,
        env = "CIRCUIT_BREAKER_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub circuit_breaker_enabled: bool,

    /// Breaker cooldown in seconds
    #[arg(long, env = "CIRCUIT_BREAKER_COOLDOWN_SEC", default_value_t = 300)]
    pub circuit_breaker_cooldown_sec: u64,

    /// Export rate tables as CSV sidecars instead of keeping them inline
    #[arg(
        long,
        env = "ENABLE_TABLE_SEPARATION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enable_table_separation: bool,

    /// Embedding model identifier
    #[arg(long, env = "EMBED_MODEL_ID", default_value = "feature-hash-v1")]
    pub embed_model_id: String,

    /// Dense index snapshot path (default {root}/vector_store/dense.json)
    #[arg(long, env = "VECTOR_STORE_PATH")]
    pub vector_store_path: Option<PathBuf>,

    /// Sparse index path (default {root}/vector_store/bm25_index.json)
    #[arg(long, env = "BM25_INDEX_PATH")]
    pub bm25_index_path: Option<PathBuf>,

    /// Rate-table sidecar directory (default {root}/assets/tables)
    #[arg(long, env = "TABLE_EXPORT_DIR")]
    pub table_export_dir: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn data_root(&self) -> PathBuf {
        if let Some(ref root) = self.data_root {
            return root.clone();
        }
        ProjectDirs::from("", "", "policyrag")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"))
    }

    pub fn vector_store_path(&self) -> PathBuf {
        self.vector_store_path
            .clone()
            .unwrap_or_else(|| self.data_root().join("vector_store").join("dense.json"))
    }

    pub fn bm25_index_path(&self) -> PathBuf {
        self.bm25_index_path
            .clone()
            .unwrap_or_else(|| self.data_root().join("vector_store").join("bm25_index.json"))
    }

    pub fn table_export_dir(&self) -> PathBuf {
        self.table_export_dir
            .clone()
            .unwrap_or_else(|| self.data_root().join("assets").join("tables"))
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_root().join("processed")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_root().join("db").join("catalog.json")
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            global_qps: self.global_qps,
            per_domain_qps: self.per_domain_qps,
            breaker_enabled: self.circuit_breaker_enabled,
            breaker_cooldown: Duration::from_secs(self.circuit_breaker_cooldown_sec),
        }
    }
}
