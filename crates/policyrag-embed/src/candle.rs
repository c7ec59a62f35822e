//! bge-small-zh embedder using Candle.
//!
//! Loads BAAI/bge-small-zh-v1.5 from the HuggingFace Hub:
//! - 512 dimensions, 512 max tokens, BERT architecture
//! - CLS pooling + L2 normalization, per the model card
//!
//! Vectors are deterministic for a given model revision, which is what the
//! index records and later verifies.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{api::tokio::Api, Repo, RepoType};
use policyrag_core::{EmbedError, Embedder};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Model identifier on the HuggingFace Hub.
const MODEL_ID: &str = "BAAI/bge-small-zh-v1.5";

/// Embedding dimension for bge-small-zh.
const EMBEDDING_DIM: usize = 512;

/// Maximum sequence length.
const MAX_TOKENS: usize = 512;

/// How many inputs go through one forward pass.
const BATCH: usize = 16;

struct Loaded {
    model: BertModel,
    tokenizer: Tokenizer,
}

/// bge-small-zh embedder.
pub struct CandleEmbedder {
    device: Device,
    loaded: Arc<RwLock<Option<Loaded>>>,
}

impl CandleEmbedder {
    #[must_use]
    pub fn new() -> Self {
        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        info!("CandleEmbedder using device: {:?}", device);
        Self {
            device,
            loaded: Arc::new(RwLock::new(None)),
        }
    }

    /// Download and load the model if not already resident.
    pub async fn init(&self) -> Result<(), EmbedError> {
        if self.loaded.read().await.is_some() {
            return Ok(());
        }

        info!("initializing embedder: {MODEL_ID}");
        let api =
            Api::new().map_err(|e| EmbedError::ModelLoad(format!("hub api failed: {e}")))?;
        let repo = api.repo(Repo::new(MODEL_ID.to_string(), RepoType::Model));

        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| EmbedError::ModelLoad(format!("tokenizer download failed: {e}")))?;
        let config_path = repo
            .get("config.json")
            .await
            .map_err(|e| EmbedError::ModelLoad(format!("config download failed: {e}")))?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .map_err(|e| EmbedError::ModelLoad(format!("weights download failed: {e}")))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedError::ModelLoad(format!("tokenizer load failed: {e}")))?;
        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| EmbedError::ModelLoad(format!("config read failed: {e}")))?;
        let config: Config = serde_json::from_str(&config_str)
            .map_err(|e| EmbedError::ModelLoad(format!("config parse failed: {e}")))?;

        // SAFETY: read-only mmap of a downloaded weights file.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &self.device)
                .map_err(|e| EmbedError::ModelLoad(format!("weights load failed: {e}")))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| EmbedError::ModelLoad(format!("bert load failed: {e}")))?;

        *self.loaded.write().await = Some(Loaded { model, tokenizer });
        info!("embedder ready: {MODEL_ID}");
        Ok(())
    }

    /// Run one forward pass over at most [`BATCH`] texts.
    async fn forward(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.init().await?;
        let guard = self.loaded.read().await;
        let loaded = guard
            .as_ref()
            .ok_or_else(|| EmbedError::Inference("model not loaded".to_string()))?;

        let encodings = loaded
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedError::Inference(format!("tokenization failed: {e}")))?;

        let max_len = encodings
            .iter()
            .map(|e| e.len())
            .max()
            .unwrap_or(0)
            .min(MAX_TOKENS);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut token_type_ids = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let len = ids.len().min(max_len);
            for i in 0..max_len {
                if i < len {
                    input_ids.push(ids[i]);
                    attention_mask.push(1u32);
                } else {
                    input_ids.push(0);
                    attention_mask.push(0);
                }
                token_type_ids.push(0u32);
            }
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device)
            .map_err(|e| EmbedError::Inference(format!("input tensor failed: {e}")))?;
        let attention_mask = Tensor::from_vec(attention_mask, shape, &self.device)
            .map_err(|e| EmbedError::Inference(format!("mask tensor failed: {e}")))?;
        let token_type_ids = Tensor::from_vec(token_type_ids, shape, &self.device)
            .map_err(|e| EmbedError::Inference(format!("type tensor failed: {e}")))?;

        let output = loaded
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| EmbedError::Inference(format!("forward failed: {e}")))?;

        // bge uses CLS pooling: the first token's hidden state.
        let cls = output
            .narrow(1, 0, 1)
            .and_then(|t| t.squeeze(1))
            .map_err(|e| EmbedError::Inference(format!("cls pooling failed: {e}")))?;
        let normalized = normalize_l2(&cls)?;

        let mut results = Vec::with_capacity(texts.len());
        for i in 0..texts.len() {
            let row = normalized
                .get(i)
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| EmbedError::Inference(format!("readback failed: {e}")))?;
            results.push(row);
        }
        debug!("embedded {} texts", results.len());
        Ok(results)
    }
}

fn normalize_l2(embeddings: &Tensor) -> Result<Tensor, EmbedError> {
    let norm = embeddings
        .sqr()
        .and_then(|t| t.sum_keepdim(1))
        .and_then(|t| t.sqrt())
        .and_then(|t| t.clamp(1e-12, f64::MAX))
        .map_err(|e| EmbedError::Inference(format!("norm failed: {e}")))?;
    embeddings
        .broadcast_div(&norm)
        .map_err(|e| EmbedError::Inference(format!("normalize failed: {e}")))
}

impl Default for CandleEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for CandleEmbedder {
    fn model_name(&self) -> &str {
        MODEL_ID
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn max_tokens(&self) -> usize {
        MAX_TOKENS
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH) {
            results.extend(self.forward(batch).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // requires model download
    async fn test_candle_embedder_end_to_end() {
        let embedder = CandleEmbedder::new();
        embedder.init().await.unwrap();

        assert_eq!(embedder.dimension(), 512);
        assert_eq!(embedder.model_name(), "BAAI/bge-small-zh-v1.5");

        let results = embedder
            .embed_batch(&["保险期间为终身", "犹豫期为十五日"])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].len(), 512);

        let norm: f32 = results[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }
}
