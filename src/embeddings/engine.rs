// engine.rs — Embedding engine capability + the candle GGUF BERT implementation.
//
// The facade only talks to `EmbeddingEngine`; `GgufBertEngine` is the in-process engine that
// reads a GGUF checkpoint, runs the BERT encoder on CPU and pools per text.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::BertModel;
use tokenizers::Tokenizer;

use crate::config;
use crate::embeddings::gguf::{self, BertHyperParams};
use crate::embeddings::normalize::normalize;
use crate::embeddings::types::{
    EmbeddingVector, NormalizationType, PoolingType, TokenizedBatch, TokenizedText,
};
use crate::error::{EmbedderError, Result};

/// Narrow interface over a loaded embedding model.
pub trait EmbeddingEngine: Sized {
    /// Load the model file with a fixed pooling strategy. Fails with `EmbedderError::Load`.
    fn load(path: &Path, pooling: PoolingType) -> Result<Self>;

    /// One record per text, in order. Fails with `EmbedderError::Input` on an empty batch.
    fn tokenize(&self, texts: &[&str], add_special_tokens: bool, enable_padding: bool) -> Result<TokenizedBatch>;

    /// One normalized vector per text, in order. Fails with `EmbedderError::Input` on an empty batch.
    fn embed(&self, texts: &[&str], normalization: NormalizationType) -> Result<Vec<EmbeddingVector>>;

    fn metadata(&self) -> BTreeMap<String, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pooling {
    Mean,
    Cls,
    Last,
}

impl TryFrom<PoolingType> for Pooling {
    type Error = EmbedderError;

    fn try_from(p: PoolingType) -> Result<Self> {
        match p {
            PoolingType::Mean => Ok(Pooling::Mean),
            PoolingType::Cls => Ok(Pooling::Cls),
            PoolingType::Last => Ok(Pooling::Last),
            PoolingType::None => Err(EmbedderError::Load(
                "pooling type none yields per-token outputs; use mean, cls or last".to_string(),
            )),
        }
    }
}

/// BERT-family GGUF model running on candle.
pub struct GgufBertEngine {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    pooling: Pooling,
    metadata: BTreeMap<String, String>,
    params: BertHyperParams,
}

impl GgufBertEngine {
    /// Output dimensionality.
    pub fn dimensions(&self) -> usize {
        self.params.hidden_size
    }

    /// Truncation and padding target for tokenization.
    pub fn context_length(&self) -> usize {
        self.params.context_length
    }

    /// Token ids and attention mask, truncated to the context length.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<(Vec<u32>, Vec<u32>)> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| EmbedderError::Engine(format!("tokenize: {e}")))?;

        let len = encoding.get_ids().len().min(self.params.context_length);
        Ok((
            encoding.get_ids()[..len].to_vec(),
            encoding.get_attention_mask()[..len].to_vec(),
        ))
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let (token_ids, attention_mask) = self.encode(text, true)?;
        if token_ids.is_empty() {
            return Ok(vec![0.0; self.params.hidden_size]);
        }
        self.forward_pooled(&token_ids, &attention_mask)
            .map_err(|e| EmbedderError::Engine(format!("inference: {e}")))
    }

    fn forward_pooled(&self, token_ids: &[u32], attention_mask: &[u32]) -> candle_core::Result<Vec<f32>> {
        // [1, seq_len]
        let token_ids_t = Tensor::new(
            token_ids.iter().map(|&id| id as i64).collect::<Vec<_>>().as_slice(),
            &self.device,
        )?
        .unsqueeze(0)?;

        let attention_mask_t = Tensor::new(
            attention_mask.iter().map(|&m| m as i64).collect::<Vec<_>>().as_slice(),
            &self.device,
        )?
        .unsqueeze(0)?;

        let token_type_ids = token_ids_t.zeros_like()?;

        // [1, seq_len, hidden_size]
        let output = self
            .model
            .forward(&token_ids_t, &token_type_ids, Some(&attention_mask_t))?;

        let pooled = match self.pooling {
            Pooling::Mean => mean_pooling(&output, &attention_mask_t)?,
            Pooling::Cls => output.narrow(1, 0, 1)?.squeeze(1)?,
            Pooling::Last => output.narrow(1, token_ids.len() - 1, 1)?.squeeze(1)?,
        };

        pooled.squeeze(0)?.to_vec1::<f32>()
    }
}

impl EmbeddingEngine for GgufBertEngine {
    fn load(path: &Path, pooling: PoolingType) -> Result<Self> {
        let pooling = Pooling::try_from(pooling)?;
        let device = Device::Cpu;

        let mut file = fs::File::open(path)
            .map_err(|e| EmbedderError::Load(format!("open {}: {e}", path.display())))?;
        let content = candle_core::quantized::gguf_file::Content::read(&mut file)
            .map_err(|e| EmbedderError::Load(format!("parse GGUF {}: {e}", path.display())))?;

        let metadata = gguf::metadata_strings(&content);
        let arch = metadata
            .get(gguf::KEY_ARCHITECTURE)
            .cloned()
            .ok_or_else(|| EmbedderError::Load(format!("{} missing", gguf::KEY_ARCHITECTURE)))?;
        if arch != "bert" {
            return Err(EmbedderError::Load(format!("unsupported architecture '{arch}'")));
        }

        let vocab = gguf::wordpiece_vocab(&gguf::vocab_tokens(&content)?);
        let pad_token_id = gguf::token_id(&vocab, config::embedding::PAD_TOKEN).unwrap_or(0);

        let tensors = gguf::load_bert_tensors(&content, &mut file, &device)?;
        let params = BertHyperParams::from_gguf(&content, &arch, &tensors, pad_token_id)?;

        log::info!(
            "Loading embedding model {}: hidden_size={}, layers={}, heads={}, context={}",
            metadata.get(gguf::KEY_NAME).map(String::as_str).unwrap_or("<unnamed>"),
            params.hidden_size,
            params.num_hidden_layers,
            params.num_attention_heads,
            params.context_length,
        );

        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = BertModel::load(vb, &params.to_bert_config()?)
            .map_err(|e| EmbedderError::Load(format!("load BERT model: {e}")))?;
        let tokenizer = gguf::build_tokenizer(&vocab)?;

        log::info!("Embedding model loaded successfully (dims={})", params.hidden_size);

        Ok(Self {
            model,
            tokenizer,
            device,
            pooling,
            metadata,
            params,
        })
    }

    fn tokenize(&self, texts: &[&str], add_special_tokens: bool, enable_padding: bool) -> Result<TokenizedBatch> {
        if texts.is_empty() {
            return Err(EmbedderError::empty_texts());
        }

        let max_len = self.params.context_length;
        let pad = self.params.pad_token_id;
        texts
            .iter()
            .map(|text| {
                let (mut tokens, mut attention_mask) = self.encode(text, add_special_tokens)?;
                if enable_padding {
                    tokens.resize(max_len, pad);
                    attention_mask.resize(max_len, 0);
                }
                Ok(TokenizedText {
                    tokens,
                    attention_mask,
                })
            })
            .collect()
    }

    fn embed(&self, texts: &[&str], normalization: NormalizationType) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Err(EmbedderError::empty_texts());
        }

        // One forward pass per text: no padding needed and cost is dominated by the encoder anyway.
        texts
            .iter()
            .map(|text| self.embed_one(text).map(|v| normalize(&v, normalization)))
            .collect()
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }
}

/// Attention-mask-aware mean pooling.
///
/// input_embeds: [batch, seq_len, hidden_size]
/// attention_mask: [batch, seq_len] (1 for real tokens, 0 for padding)
/// output: [batch, hidden_size]
fn mean_pooling(input_embeds: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    // [batch, seq_len] → [batch, seq_len, hidden_size]
    let mask_expanded = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(input_embeds.shape())?;

    let sum_embeddings = (input_embeds * &mask_expanded)?.sum(1)?;
    let sum_mask = mask_expanded
        .sum(1)?
        .clamp(config::embedding::MEAN_POOLING_MIN_MASK_SUM, f64::MAX)?;

    sum_embeddings / sum_mask
}
