// embeddings/ — GGUF text embeddings behind a small facade.
//
// Provides:
// - Model references + download cache (Hugging Face style endpoints)
// - The engine capability trait and a candle BERT engine for GGUF files
// - Pooling/normalization options and the `Embedder` facade

pub mod download;
pub mod embedder;
pub mod engine;
pub mod gguf;
pub mod normalize;
pub mod source;
pub mod types;

pub use download::{ModelResolver, ResolverConfig};
pub use embedder::Embedder;
pub use engine::{EmbeddingEngine, GgufBertEngine};
pub use source::{CachedModelFile, ModelReference};
pub use types::{
    EmbedderConfig, EmbeddingVector, NormalizationType, PNormExponent, PoolingType, TokenizeOptions,
    TokenizedBatch, TokenizedText,
};
