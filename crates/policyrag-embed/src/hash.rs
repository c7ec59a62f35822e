//! Deterministic feature-hashing embedder.
//!
//! Maps text to a fixed-dimension vector by hashing character unigrams and
//! bigrams into buckets and L2-normalizing the counts. Texts sharing
//! vocabulary land in shared buckets, so cosine similarity tracks surface
//! overlap. That is enough for pipeline tests and degraded environments,
//! with no model download and bit-for-bit determinism.

use async_trait::async_trait;
use policyrag_core::{EmbedError, Embedder};

const MODEL_NAME: &str = "feature-hash-v1";
const DEFAULT_DIM: usize = 512;

/// Character-n-gram feature hashing embedder.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_DIM,
        }
    }

    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        for (i, &c) in chars.iter().enumerate() {
            let mut buf = [0u8; 4];
            let unigram = c.encode_utf8(&mut buf);
            bump(&mut vector, fnv1a(unigram.as_bytes()), 1.0);

            if let Some(&next) = chars.get(i + 1) {
                let mut bigram = String::with_capacity(8);
                bigram.push(c);
                bigram.push(next);
                // Bigrams carry more signal than single characters.
                bump(&mut vector, fnv1a(bigram.as_bytes()), 2.0);
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn bump(vector: &mut [f32], hash: u64, weight: f32) {
    let dim = vector.len() as u64;
    let bucket = (hash % dim) as usize;
    // Sign from a high bit decorrelates colliding features.
    let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
    vector[bucket] += sign * weight;
}

/// FNV-1a, the same small hash the crawl-side bloom filters use.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        usize::MAX
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let embedder = HashingEmbedder::new();
        let a = embedder.embed("保险期间为终身").await.unwrap();
        let b = embedder.embed("保险期间为终身").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unit_norm_and_dimension() {
        let embedder = HashingEmbedder::with_dimension(128);
        let v = embedder.embed("现金价值").await.unwrap();
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::new();
        let period_clause = embedder.embed("本合同的保险期间为终身").await.unwrap();
        let period_query = embedder.embed("保险期间是多久").await.unwrap();
        let unrelated = embedder.embed("火星上的骑行装备").await.unwrap();

        assert!(cosine(&period_clause, &period_query) > cosine(&period_clause, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_batch_matches_single() {
        let embedder = HashingEmbedder::new();
        let batch = embedder.embed_batch(&["退保", "减额交清"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("退保").await.unwrap());
        assert_eq!(batch[1], embedder.embed("减额交清").await.unwrap());
    }
}
