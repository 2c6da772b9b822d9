// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

// NOTE: HOST_VERSION must stay in sync with the `version` field in Cargo.toml.
pub const HOST_VERSION: &str = "0.1.0";

pub mod cache {
    // Cache root relative to the home directory; LLAMA_CACHE_DIR replaces it entirely.
    pub const CACHE_DIR_REL: &str = ".cache/llama_cache";
    pub const CACHE_DIR_ENV: &str = "LLAMA_CACHE_DIR";

    pub const MODELS_SUBDIR: &str = "models";
    pub const LOGS_SUBDIR: &str = "logs";

    // Only GGUF files are accepted as remote models and listed as cached models.
    pub const MODEL_FILE_EXTENSION: &str = "gguf";

    // Staging files live next to the target: <target>.<pid>.part
    pub const STAGING_SUFFIX: &str = "part";
}

pub mod download {
    pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
    pub const TOKEN_ENV: &str = "HF_TOKEN";
    // Mirror or private hub; replaces DEFAULT_ENDPOINT when set.
    pub const ENDPOINT_ENV: &str = "HF_ENDPOINT";

    pub const CHUNK_SIZE_BYTES: usize = 64 * 1024;

    // Connect timeout only; model bodies can be gigabytes so there is no overall read timeout.
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
}

pub mod logging {
    pub const LOG_FILE_NAME: &str = "llama_embedder_host.log";
    pub const DEFAULT_LEVEL: &str = "info";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod host {
    // Loaded embedders unused for this long are dropped before the next request is handled.
    pub const EMBEDDER_IDLE_TTL_SECS: u64 = 10 * 60;

    // Upper bound on simultaneously loaded embedders; the least recently used one is dropped.
    pub const MAX_LOADED_EMBEDDERS: usize = 4;
}

pub mod native_messaging {
    pub const MAX_MESSAGE_SIZE_BYTES: u32 = 128 * 1024 * 1024;
}

pub mod embedding {
    // Scale target for MAX_ABS_INT16 normalization (fits in i16 with headroom).
    pub const MAX_ABS_INT16_SCALE: f32 = 32760.0;

    // GGUF stores word-initial WordPiece tokens with this phantom-space prefix.
    pub const GGUF_WORD_PREFIX: char = '\u{2581}';
    pub const WORDPIECE_CONTINUATION_PREFIX: &str = "##";
    pub const WORDPIECE_MAX_INPUT_CHARS_PER_WORD: usize = 100;

    pub const CLS_TOKEN: &str = "[CLS]";
    pub const SEP_TOKEN: &str = "[SEP]";
    pub const PAD_TOKEN: &str = "[PAD]";
    pub const UNK_TOKEN: &str = "[UNK]";

    // Fallbacks when the GGUF metadata omits them.
    pub const DEFAULT_LAYER_NORM_EPS: f64 = 1e-12;
    pub const DEFAULT_TYPE_VOCAB_SIZE: usize = 2;

    // Mean pooling divisor clamp (avoid div by zero on fully masked rows).
    pub const MEAN_POOLING_MIN_MASK_SUM: f64 = 1e-9;
}
