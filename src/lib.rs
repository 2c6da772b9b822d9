pub mod config;
pub mod embeddings;
pub mod error;
pub mod host;
pub mod logging;
pub mod native_messaging;
pub mod paths;
pub mod protocol;

pub use embeddings::{
    Embedder, EmbedderConfig, EmbeddingEngine, GgufBertEngine, ModelReference, ModelResolver,
    NormalizationType, PoolingType, ResolverConfig, TokenizeOptions,
};
pub use error::{EmbedderError, Result};
