//! BGE-small embedder using Candle.
//!
//! Uses `BAAI/bge-small-en-v1.5`:
//! - 384 dimensions
//! - 512 max tokens
//! - BERT architecture, CLS pooling
//! - queries carry a retrieval instruction prefix, documents do not

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use gqlrag_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};
use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Model identifier on Hugging Face Hub.
pub const MODEL_ID: &str = "BAAI/bge-small-en-v1.5";

/// Instruction prepended to queries.
pub const QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

const EMBEDDING_DIM: usize = 384;

const MAX_TOKENS: usize = 512;

struct Loaded {
    model: BertModel,
    tokenizer: Tokenizer,
}

/// BGE-small embedder using Candle.
pub struct BgeEmbedder {
    device: Device,
    /// Model cache directory
    cache_dir: PathBuf,
    loaded: RwLock<Option<Loaded>>,
}

fn inference(context: &'static str) -> impl FnOnce(candle_core::Error) -> EmbedError {
    move |e| EmbedError::Inference(format!("{context}: {e}"))
}

impl BgeEmbedder {
    /// Create an embedder caching model files under `cache_dir`.
    pub fn new(cache_dir: PathBuf) -> Self {
        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        info!("BgeEmbedder using device: {:?}", device);
        Self::with_device(cache_dir, device)
    }

    /// Create with specific device.
    pub fn with_device(cache_dir: PathBuf, device: Device) -> Self {
        Self {
            device,
            cache_dir,
            loaded: RwLock::new(None),
        }
    }

    /// Download the model if needed and load it into memory.
    pub async fn init(&self) -> Result<(), EmbedError> {
        if self.loaded.read().await.is_some() {
            return Ok(());
        }
        let mut slot = self.loaded.write().await;
        if slot.is_some() {
            return Ok(());
        }

        info!("Initializing BgeEmbedder with model: {}", MODEL_ID);

        let api = ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .build()
            .map_err(|e| EmbedError::ModelLoad(format!("failed to create HF API: {e}")))?;
        let repo = api.repo(Repo::new(MODEL_ID.to_string(), RepoType::Model));

        let mut files = Vec::new();
        for name in ["tokenizer.json", "config.json", "model.safetensors"] {
            debug!("Fetching {}", name);
            let path = repo
                .get(name)
                .await
                .map_err(|e| EmbedError::ModelLoad(format!("failed to download {name}: {e}")))?;
            files.push(path);
        }
        let [tokenizer_path, config_path, weights_path]: [PathBuf; 3] = files
            .try_into()
            .map_err(|_| EmbedError::ModelLoad("missing model files".to_string()))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to load tokenizer: {e}")))?;

        let config_str = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| EmbedError::ModelLoad(format!("failed to read config: {e}")))?;
        let config: Config = serde_json::from_str(&config_str)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to parse config: {e}")))?;

        // SAFETY: the weights file is only read, never modified while mapped.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &self.device)
                .map_err(|e| EmbedError::ModelLoad(format!("failed to load weights: {e}")))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to create BERT model: {e}")))?;

        *slot = Some(Loaded { model, tokenizer });
        info!("BgeEmbedder initialized");
        Ok(())
    }

    /// Encode one batch: pad to the longest input, run BERT, take the CLS vector.
    async fn encode_batch(
        &self,
        texts: &[String],
        normalize: bool,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
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
            .map(tokenizers::Encoding::len)
            .max()
            .unwrap_or(0)
            .min(MAX_TOKENS);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut token_counts = Vec::with_capacity(texts.len());

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let len = ids.len().min(max_len);
            token_counts.push(len);
            for i in 0..max_len {
                if i < len {
                    input_ids.push(ids[i]);
                    attention_mask.push(1u32);
                } else {
                    input_ids.push(0);
                    attention_mask.push(0);
                }
            }
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device)
            .map_err(inference("input_ids tensor"))?;
        let attention_mask = Tensor::from_vec(attention_mask, shape, &self.device)
            .map_err(inference("attention_mask tensor"))?;
        let token_type_ids = input_ids.zeros_like().map_err(inference("token_type_ids"))?;

        let output = loaded
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(inference("model forward"))?;

        let cls = output
            .narrow(1, 0, 1)
            .and_then(|t| t.squeeze(1))
            .map_err(inference("cls pooling"))?;

        let embeddings = if normalize {
            let norm = cls
                .sqr()
                .and_then(|t| t.sum_keepdim(1))
                .and_then(|t| t.sqrt())
                .and_then(|t| t.clamp(1e-12, f64::MAX))
                .map_err(inference("norm"))?;
            cls.broadcast_div(&norm).map_err(inference("normalize"))?
        } else {
            cls
        };

        let rows = embeddings
            .to_vec2::<f32>()
            .map_err(inference("convert to vec"))?;

        Ok(rows
            .into_iter()
            .zip(token_counts)
            .map(|(embedding, token_count)| EmbeddingOutput {
                embedding,
                token_count,
            })
            .collect())
    }

    async fn embed_all(
        &self,
        texts: Vec<String>,
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(config.batch_size.max(1)) {
            results.extend(self.encode_batch(chunk, config.normalize).await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl Embedder for BgeEmbedder {
    fn model_name(&self) -> &str {
        MODEL_ID
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn max_tokens(&self) -> usize {
        MAX_TOKENS
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Embedding {} texts with batch_size {}",
            texts.len(),
            config.batch_size
        );
        let texts = texts.iter().map(|t| (*t).to_string()).collect();
        self.embed_all(texts, config).await
    }

    async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<EmbeddingOutput, EmbedError> {
        let instruction = config.instruction.as_deref().unwrap_or(QUERY_INSTRUCTION);
        self.embed_all(vec![format!("{instruction}{query}")], config)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Inference("empty embedding result".to_string()))
    }
}
