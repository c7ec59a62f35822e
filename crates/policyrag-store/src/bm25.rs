//! BM25 sparse index over jieba tokens.
//!
//! Dense retrieval misses exact strings (clause numbers like "1.2.1",
//! product-specific terms), which is precisely where BM25 shines. Scoring is
//! BM25-Okapi; tokenization is jieba with a short stop list applied
//! symmetrically at index and query time, plus a pre-pass that keeps dotted
//! clause numbers whole.

use async_trait::async_trait;
use jieba_rs::Jieba;
use policyrag_core::{PolicyChunk, SparseHit, SparseIndex, StoreError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::LazyLock;
use tokio::sync::RwLock;
use tracing::{debug, info};

const K1: f64 = 1.5;
const B: f64 = 0.75;

static DOTTED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)+").unwrap());

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上",
        "也", "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这",
    ]
    .into_iter()
    .collect()
});

/// Tokenized document, the unit of persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDoc {
    id: String,
    tokens: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Corpus {
    docs: Vec<IndexedDoc>,
}

impl Corpus {
    /// Document frequency per term and average document length.
    fn stats(&self) -> (HashMap<&str, usize>, f64) {
        let mut df: HashMap<&str, usize> = HashMap::new();
        let mut total_len = 0usize;
        for doc in &self.docs {
            total_len += doc.tokens.len();
            let unique: HashSet<&str> = doc.tokens.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }
        let avgdl = if self.docs.is_empty() {
            0.0
        } else {
            total_len as f64 / self.docs.len() as f64
        };
        (df, avgdl)
    }
}

/// BM25-Okapi index, persisted as JSON (tokenized corpus plus ids).
pub struct Bm25Index {
    jieba: Jieba,
    path: Option<PathBuf>,
    corpus: RwLock<Corpus>,
}

impl Bm25Index {
    /// In-memory index.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            jieba: Jieba::new(),
            path: None,
            corpus: RwLock::new(Corpus::default()),
        }
    }

    /// Open (or create) a file-backed index.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let corpus = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Init(format!("bm25 read failed: {e}")))?;
            let corpus: Corpus = serde_json::from_str(&json)
                .map_err(|e| StoreError::Init(format!("bm25 decode failed: {e}")))?;
            info!("opened bm25 index: {} docs", corpus.docs.len());
            corpus
        } else {
            Corpus::default()
        };
        Ok(Self {
            jieba: Jieba::new(),
            path: Some(path),
            corpus: RwLock::new(corpus),
        })
    }

    /// Segment text, keeping dotted clause numbers whole and applying the
    /// stop list. Used for both documents and queries.
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens: Vec<String> = DOTTED_NUMBER
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();

        for token in self.jieba.cut(text, false) {
            let trimmed = token.trim();
            if trimmed.chars().count() < 2 || STOPWORDS.contains(trimmed) {
                continue;
            }
            if trimmed.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace()) {
                continue;
            }
            tokens.push(trimmed.to_string());
        }
        tokens
    }

    async fn persist(&self, corpus: &Corpus) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persist(format!("mkdir failed: {e}")))?;
        }
        let json = serde_json::to_string(corpus)
            .map_err(|e| StoreError::Persist(format!("bm25 encode failed: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| StoreError::Persist(format!("bm25 write failed: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StoreError::Persist(format!("bm25 rename failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SparseIndex for Bm25Index {
    async fn build(&self, chunks: &[PolicyChunk]) -> Result<(), StoreError> {
        let docs = chunks
            .iter()
            .map(|chunk| IndexedDoc {
                id: chunk.id.clone(),
                tokens: self.tokenize(&chunk.content),
            })
            .collect();

        let corpus = Corpus { docs };
        self.persist(&corpus).await?;
        *self.corpus.write().await = corpus;
        debug!("built bm25 index over {} chunks", chunks.len());
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SparseHit>, StoreError> {
        let query_tokens = self.tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let corpus = self.corpus.read().await;
        if corpus.docs.is_empty() {
            return Ok(Vec::new());
        }
        let (df, avgdl) = corpus.stats();
        let n = corpus.docs.len() as f64;

        let mut hits: Vec<SparseHit> = corpus
            .docs
            .iter()
            .filter_map(|doc| {
                let dl = doc.tokens.len() as f64;
                let mut tf: HashMap<&str, usize> = HashMap::new();
                for token in &doc.tokens {
                    *tf.entry(token.as_str()).or_insert(0) += 1;
                }

                let mut score = 0.0f64;
                for term in &query_tokens {
                    let Some(&term_tf) = tf.get(term.as_str()) else {
                        continue;
                    };
                    let term_df = *df.get(term.as_str()).unwrap_or(&0) as f64;
                    let idf = ((n - term_df + 0.5) / (term_df + 0.5) + 1.0).ln();
                    let term_tf = term_tf as f64;
                    let denom = term_tf + K1 * (1.0 - B + B * dl / avgdl.max(1e-9));
                    score += idf * term_tf * (K1 + 1.0) / denom;
                }

                (score > 0.0).then(|| SparseHit {
                    id: doc.id.clone(),
                    score: score as f32,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let corpus = self.corpus.read().await;
        Ok(corpus.docs.iter().map(|d| d.id.clone()).collect())
    }
}
