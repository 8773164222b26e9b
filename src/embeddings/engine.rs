// engine.rs - Local sentence embeddings for mail items (candle BERT, all-MiniLM-L6-v2).
//
// One message in, one 384-dim unit vector out. Padding tokens are excluded from
// the mean so short messages are not pulled toward the padding embedding.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::config;
use crate::embeddings::Embedder;
use crate::error::{EmbedError, ModelUnavailable};

/// The embedding engine holds the loaded model and tokenizer.
///
/// Read-only after `load`; one instance is built per process and lent to the pipeline.
pub struct EmbeddingEngine {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl EmbeddingEngine {
    /// Load the model from a local directory containing model.safetensors,
    /// tokenizer.json, and config.json.
    pub fn load(model_dir: &Path) -> Result<Self, ModelUnavailable> {
        Self::load_inner(model_dir).map_err(ModelUnavailable)
    }

    fn load_inner(model_dir: &Path) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        let config_path = model_dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        let config: BertConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("parse {}", config_path.display()))?;

        log::info!(
            "Loading embedding model: hidden_size={}, layers={}, heads={}",
            config.hidden_size,
            config.num_hidden_layers,
            config.num_attention_heads,
        );

        if config.hidden_size != config::embedding::EMBEDDING_DIMS {
            bail!(
                "model hidden_size {} does not match expected embedding dims {}",
                config.hidden_size,
                config::embedding::EMBEDDING_DIMS
            );
        }

        let weights_path = model_dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], DType::F32, &device)
                .with_context(|| format!("load weights from {}", weights_path.display()))?
        };

        let model = BertModel::load(vb, &config).context("load BERT model")?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;

        log::info!("Embedding model loaded successfully (dims={})", config.hidden_size);

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn embed_inner(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let dims = config::embedding::EMBEDDING_DIMS;
        if text.trim().is_empty() {
            return Ok(vec![0.0; dims]);
        }

        let (ids, mask) = self.encode(text)?;
        let vector: Vec<f32> = self.forward_pooled(&ids, &mask)?.squeeze(0)?.to_vec1()?;
        if vector.len() != dims {
            bail!("model produced {} dims, expected {}", vector.len(), dims);
        }
        Ok(vector)
    }

    /// Tokenize to `[1, seq_len]` id and mask tensors, capped at the model's context.
    fn encode(&self, text: &str) -> anyhow::Result<(Tensor, Tensor)> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let keep = encoding.get_ids().len().min(config::embedding::MAX_TOKENS);
        let ids: Vec<i64> = encoding.get_ids()[..keep].iter().map(|&t| t as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask()[..keep].iter().map(|&m| m as i64).collect();

        let ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let mask = Tensor::new(mask.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok((ids, mask))
    }

    /// BERT forward pass, then masked mean pooling and L2 normalization: `[1, hidden]`.
    fn forward_pooled(&self, ids: &Tensor, mask: &Tensor) -> anyhow::Result<Tensor> {
        let token_types = ids.zeros_like()?;
        let hidden = self.model.forward(ids, &token_types, Some(mask))?;
        l2_normalize(&mean_pooling(&hidden, mask)?)
    }
}

impl Embedder for EmbeddingEngine {
    /// Empty or whitespace-only text yields the all-zero vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_inner(text).map_err(EmbedError)
    }

    fn dims(&self) -> usize {
        config::embedding::EMBEDDING_DIMS
    }

    fn model_name(&self) -> &str {
        config::embedding::EMBEDDING_MODEL_NAME
    }
}

/// Attention-mask-aware mean pooling.
///
/// input_embeds: [batch, seq_len, hidden_size]
/// attention_mask: [batch, seq_len] (1 for real tokens, 0 for padding)
/// output: [batch, hidden_size]
fn mean_pooling(input_embeds: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
    let mask_expanded = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(input_embeds.shape())?;

    let sum_embeddings = (input_embeds * &mask_expanded)?.sum(1)?;

    // clamp avoids div by zero on an all-padding row
    let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;

    Ok((sum_embeddings / sum_mask)?)
}

/// L2 normalize a tensor along the last dimension.
fn l2_normalize(tensor: &Tensor) -> anyhow::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.clamp(1e-12, f64::MAX)?;
    Ok(tensor.broadcast_div(&norm)?)
}
