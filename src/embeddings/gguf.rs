// gguf.rs — Bridges GGUF BERT checkpoints to candle's BERT model and a WordPiece tokenizer.
//
// llama.cpp's converter renames BERT tensors (token_embd, blk.N.attn_q, ...) and stores the
// WordPiece vocabulary with a phantom-space convention: word-initial pieces get a "▁" prefix and
// continuation pieces lose their "##". Both are mapped back here so the stock candle BERT
// implementation and the `tokenizers` WordPiece model can consume the file.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};

use candle_core::quantized::gguf_file::{Content, Value};
use candle_core::{Device, Tensor};
use candle_transformers::models::bert::Config as BertConfig;
use tokenizers::Tokenizer;

use crate::config;
use crate::error::{EmbedderError, Result};

pub const KEY_ARCHITECTURE: &str = "general.architecture";
pub const KEY_NAME: &str = "general.name";
pub const KEY_TOKENS: &str = "tokenizer.ggml.tokens";

/// Render a metadata value the way llama.cpp's `gguf_kv_to_str` does for scalars.
/// Arrays are summarized as `arr[<len>]` (token lists run to tens of thousands of entries).
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::U8(x) => x.to_string(),
        Value::I8(x) => x.to_string(),
        Value::U16(x) => x.to_string(),
        Value::I16(x) => x.to_string(),
        Value::U32(x) => x.to_string(),
        Value::I32(x) => x.to_string(),
        Value::U64(x) => x.to_string(),
        Value::I64(x) => x.to_string(),
        Value::F32(x) => x.to_string(),
        Value::F64(x) => x.to_string(),
        Value::Bool(x) => x.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!("arr[{}]", items.len()),
    }
}

pub fn metadata_strings(content: &Content) -> BTreeMap<String, String> {
    content
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect()
}

fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::U8(x) => Some(u64::from(*x)),
        Value::U16(x) => Some(u64::from(*x)),
        Value::U32(x) => Some(u64::from(*x)),
        Value::U64(x) => Some(*x),
        Value::I8(x) => u64::try_from(*x).ok(),
        Value::I16(x) => u64::try_from(*x).ok(),
        Value::I32(x) => u64::try_from(*x).ok(),
        Value::I64(x) => u64::try_from(*x).ok(),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::F32(x) => Some(f64::from(*x)),
        Value::F64(x) => Some(*x),
        other => value_as_u64(other).map(|x| x as f64),
    }
}

fn required_usize(content: &Content, key: &str) -> Result<usize> {
    content
        .metadata
        .get(key)
        .and_then(value_as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| EmbedderError::Load(format!("missing or non-integer metadata key {key}")))
}

/// Raw `tokenizer.ggml.tokens` list.
pub fn vocab_tokens(content: &Content) -> Result<Vec<String>> {
    let items = match content.metadata.get(KEY_TOKENS) {
        Some(Value::Array(items)) => items,
        _ => return Err(EmbedderError::Load(format!("missing {KEY_TOKENS} array"))),
    };
    items
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            _ => Err(EmbedderError::Load(format!("{KEY_TOKENS} contains a non-string entry"))),
        })
        .collect()
}

/// Undo the phantom-space convention. Vocabularies written without it are returned as-is.
pub fn wordpiece_vocab(tokens: &[String]) -> Vec<String> {
    let prefix = config::embedding::GGUF_WORD_PREFIX;
    if !tokens.iter().any(|t| t.starts_with(prefix)) {
        return tokens.to_vec();
    }
    tokens
        .iter()
        .map(|t| {
            if let Some(word) = t.strip_prefix(prefix) {
                word.to_string()
            } else if t.starts_with('[') && t.ends_with(']') {
                t.clone()
            } else {
                format!("{}{}", config::embedding::WORDPIECE_CONTINUATION_PREFIX, t)
            }
        })
        .collect()
}

/// GGUF tensor name → Hugging Face BERT parameter name. `None` for tensors the encoder ignores.
pub fn hf_tensor_name(gguf_name: &str) -> Option<String> {
    let fixed = match gguf_name {
        "token_embd.weight" => Some("embeddings.word_embeddings.weight"),
        "position_embd.weight" => Some("embeddings.position_embeddings.weight"),
        "token_types.weight" => Some("embeddings.token_type_embeddings.weight"),
        "token_embd_norm.weight" => Some("embeddings.LayerNorm.weight"),
        "token_embd_norm.bias" => Some("embeddings.LayerNorm.bias"),
        _ => None,
    };
    if let Some(name) = fixed {
        return Some(name.to_string());
    }

    let rest = gguf_name.strip_prefix("blk.")?;
    let (layer, rest) = rest.split_once('.')?;
    let layer: usize = layer.parse().ok()?;
    let (module, param) = rest.rsplit_once('.')?;
    let module = match module {
        "attn_q" => "attention.self.query",
        "attn_k" => "attention.self.key",
        "attn_v" => "attention.self.value",
        "attn_output" => "attention.output.dense",
        "attn_output_norm" => "attention.output.LayerNorm",
        "ffn_up" => "intermediate.dense",
        "ffn_down" => "output.dense",
        "layer_output_norm" => "output.LayerNorm",
        _ => return None,
    };
    Some(format!("encoder.layer.{layer}.{module}.{param}"))
}

/// Dequantize every encoder tensor to f32, keyed by its BERT name.
pub fn load_bert_tensors<R: Read + Seek>(
    content: &Content,
    reader: &mut R,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    let mut tensors = HashMap::new();
    for gguf_name in content.tensor_infos.keys() {
        let Some(hf_name) = hf_tensor_name(gguf_name) else {
            log::debug!("Skipping GGUF tensor {}", gguf_name);
            continue;
        };
        let tensor = content
            .tensor(&mut *reader, gguf_name, device)
            .and_then(|q| q.dequantize(device))
            .map_err(|e| EmbedderError::Load(format!("tensor {gguf_name}: {e}")))?;
        tensors.insert(hf_name, tensor);
    }
    Ok(tensors)
}

/// Encoder hyperparameters read from `<arch>.*` metadata and the loaded tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct BertHyperParams {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub context_length: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
    pub pad_token_id: u32,
}

impl BertHyperParams {
    pub fn from_gguf(
        content: &Content,
        arch: &str,
        tensors: &HashMap<String, Tensor>,
        pad_token_id: u32,
    ) -> Result<Self> {
        let rows = |name: &str| tensors.get(name).and_then(|t| t.dims().first().copied());

        let vocab_size = rows("embeddings.word_embeddings.weight")
            .ok_or_else(|| EmbedderError::Load("missing token_embd.weight".to_string()))?;
        let type_vocab_size = rows("embeddings.token_type_embeddings.weight")
            .unwrap_or(config::embedding::DEFAULT_TYPE_VOCAB_SIZE);
        let layer_norm_eps = content
            .metadata
            .get(&format!("{arch}.attention.layer_norm_epsilon"))
            .and_then(value_as_f64)
            .unwrap_or(config::embedding::DEFAULT_LAYER_NORM_EPS);

        Ok(Self {
            vocab_size,
            hidden_size: required_usize(content, &format!("{arch}.embedding_length"))?,
            num_hidden_layers: required_usize(content, &format!("{arch}.block_count"))?,
            num_attention_heads: required_usize(content, &format!("{arch}.attention.head_count"))?,
            intermediate_size: required_usize(content, &format!("{arch}.feed_forward_length"))?,
            context_length: required_usize(content, &format!("{arch}.context_length"))?,
            type_vocab_size,
            layer_norm_eps,
            pad_token_id,
        })
    }

    pub fn to_bert_config(&self) -> Result<BertConfig> {
        let value = serde_json::json!({
            "vocab_size": self.vocab_size,
            "hidden_size": self.hidden_size,
            "num_hidden_layers": self.num_hidden_layers,
            "num_attention_heads": self.num_attention_heads,
            "intermediate_size": self.intermediate_size,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.0,
            "max_position_embeddings": self.context_length,
            "type_vocab_size": self.type_vocab_size,
            "initializer_range": 0.02,
            "layer_norm_eps": self.layer_norm_eps,
            "pad_token_id": self.pad_token_id,
            "position_embedding_type": "absolute",
            "use_cache": false,
            "classifier_dropout": null,
            "model_type": null,
        });
        serde_json::from_value(value).map_err(|e| EmbedderError::Load(format!("BERT config: {e}")))
    }
}

pub fn token_id(vocab: &[String], token: &str) -> Option<u32> {
    vocab.iter().position(|t| t == token).map(|i| i as u32)
}

/// Uncased WordPiece tokenizer with `[CLS] … [SEP]` post-processing.
pub fn build_tokenizer(vocab: &[String]) -> Result<Tokenizer> {
    use config::embedding::{CLS_TOKEN, PAD_TOKEN, SEP_TOKEN, UNK_TOKEN};

    let require = |token: &str| {
        token_id(vocab, token).ok_or_else(|| EmbedderError::Load(format!("vocabulary has no {token} token")))
    };
    let cls_id = require(CLS_TOKEN)?;
    let sep_id = require(SEP_TOKEN)?;
    require(UNK_TOKEN)?;

    let mut vocab_map = serde_json::Map::with_capacity(vocab.len());
    for (id, token) in vocab.iter().enumerate() {
        vocab_map
            .entry(token.clone())
            .or_insert_with(|| serde_json::Value::from(id as u32));
    }

    let added_tokens: Vec<serde_json::Value> = vocab
        .iter()
        .enumerate()
        .filter(|(_, t)| [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN, "[MASK]"].contains(&t.as_str()))
        .map(|(id, t)| {
            serde_json::json!({
                "id": id as u32,
                "content": t,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true,
            })
        })
        .collect();

    let spec = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true,
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": {
            "type": "BertProcessing",
            "sep": [SEP_TOKEN, sep_id],
            "cls": [CLS_TOKEN, cls_id],
        },
        "decoder": {
            "type": "WordPiece",
            "prefix": config::embedding::WORDPIECE_CONTINUATION_PREFIX,
            "cleanup": true,
        },
        "model": {
            "type": "WordPiece",
            "unk_token": UNK_TOKEN,
            "continuing_subword_prefix": config::embedding::WORDPIECE_CONTINUATION_PREFIX,
            "max_input_chars_per_word": config::embedding::WORDPIECE_MAX_INPUT_CHARS_PER_WORD,
            "vocab": vocab_map,
        },
    });

    let bytes = serde_json::to_vec(&spec).map_err(|e| EmbedderError::Load(format!("tokenizer spec: {e}")))?;
    Tokenizer::from_bytes(bytes).map_err(|e| EmbedderError::Load(format!("build tokenizer: {e}")))
}
