//! Error taxonomy for model resolution, loading and embedding.

/// Message carried by [`EmbedderError::Input`] when a batch has no texts.
pub const EMPTY_TEXTS_MESSAGE: &str = "texts are empty";

/// Every failure surfaced by the resolver, the facade and the engine.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// Invalid construction input (e.g. a directory without a repository).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-2xx HTTP response while fetching a model.
    #[error("fetching the model failed: {status} - {reason} ({url})")]
    Download { url: String, status: u16, reason: String },

    /// The HTTP request never produced a response (DNS, connect, TLS, reset).
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// Downloaded bytes did not hash to the expected digest.
    #[error("SHA256 mismatch for {file}: expected {expected}, got {actual}")]
    Integrity {
        file: String,
        expected: String,
        actual: String,
    },

    /// Bad call input. Displays the bare message so callers can match on it.
    #[error("{0}")]
    Input(String),

    /// The engine could not parse or load the model file.
    #[error("failed to load model: {0}")]
    Load(String),

    /// The engine failed while tokenizing or running inference.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmbedderError {
    pub fn empty_texts() -> Self {
        EmbedderError::Input(EMPTY_TEXTS_MESSAGE.to_string())
    }

    /// Stable tag for logs and host responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EmbedderError::Configuration(_) => "configuration",
            EmbedderError::Download { .. } => "download",
            EmbedderError::Transport { .. } => "transport",
            EmbedderError::Integrity { .. } => "integrity",
            EmbedderError::Input(_) => "input",
            EmbedderError::Load(_) => "load",
            EmbedderError::Engine(_) => "engine",
            EmbedderError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, EmbedderError>;
