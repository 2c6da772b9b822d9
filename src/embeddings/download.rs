// download.rs — Model source resolution with an on-disk download cache.
//
// Remote models are fetched from a Hugging Face style endpoint on first use and cached at
// <cache_root>/models/<basename>. Bodies are streamed in fixed-size chunks into a per-process
// staging file and renamed onto the target only after the transfer (and optional SHA256 check)
// completed, so the target path never holds a partial file.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config;
use crate::embeddings::source::{CachedModelFile, ModelReference};
use crate::error::{EmbedderError, Result};
use crate::paths;

/// Explicit resolver configuration. `from_env` gives the process defaults.
#[derive(Clone)]
pub struct ResolverConfig {
    pub cache_root: PathBuf,
    /// Scheme + host, no trailing slash (e.g. `https://huggingface.co`).
    pub endpoint: String,
    /// Token used when a reference carries none.
    pub env_token: Option<String>,
    pub connect_timeout: Duration,
    pub chunk_size: usize,
}

impl ResolverConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            endpoint: config::download::DEFAULT_ENDPOINT.to_string(),
            env_token: None,
            connect_timeout: Duration::from_secs(config::download::CONNECT_TIMEOUT_SECS),
            chunk_size: config::download::CHUNK_SIZE_BYTES,
        }
    }

    /// Cache root from LLAMA_CACHE_DIR or the home directory, token from HF_TOKEN,
    /// endpoint from HF_ENDPOINT.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cache_root = paths::cache_root_from(non_blank(config::cache::CACHE_DIR_ENV))
            .map_err(|e| EmbedderError::Configuration(format!("{e:#}")))?;
        let mut cfg = Self::new(cache_root).with_env_token(non_blank(config::download::TOKEN_ENV));
        if let Some(endpoint) = non_blank(config::download::ENDPOINT_ENV) {
            cfg = cfg.with_endpoint(endpoint);
        }
        Ok(cfg)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_env_token(mut self, token: Option<String>) -> Self {
        self.env_token = token;
        self
    }

    pub fn models_dir(&self) -> PathBuf {
        paths::models_dir(&self.cache_root)
    }
}

impl std::fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("cache_root", &self.cache_root)
            .field("endpoint", &self.endpoint)
            .field("env_token", &self.env_token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Turns a `ModelReference` into a local file. Holds no state besides its config;
/// the on-disk cache is shared with every other resolver pointing at the same root.
pub struct ModelResolver {
    config: ResolverConfig,
    agent: ureq::Agent,
}

impl ModelResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .build();
        Self { config, agent }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ResolverConfig::from_env()?))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn models_dir(&self) -> PathBuf {
        self.config.models_dir()
    }

    pub fn resolve(&self, reference: &ModelReference) -> Result<CachedModelFile> {
        reference.validate()?;

        match reference {
            ModelReference::Local(path) => {
                log::debug!("Using local model file {}", path.display());
                Ok(CachedModelFile {
                    path: path.clone(),
                    source: reference.clone(),
                    downloaded: false,
                })
            }
            ModelReference::Remote {
                repository,
                file_name,
                token,
                sha256,
            } => {
                let dest = self.target_path(repository, file_name)?;

                if dest.is_file() {
                    log::info!("Model {} already cached at {}", reference, dest.display());
                    if let Some(expected) = sha256.as_deref() {
                        let actual = self.file_sha256(&dest)?;
                        verify_sha256(&dest, expected, actual)?;
                    }
                    return Ok(CachedModelFile {
                        path: dest,
                        source: reference.clone(),
                        downloaded: false,
                    });
                }

                let url = download_url(&self.config.endpoint, repository, file_name);
                let token = effective_token(token.as_deref(), self.config.env_token.as_deref());

                fs::create_dir_all(self.models_dir())?;
                self.download(&url, &dest, token, sha256.as_deref())?;

                Ok(CachedModelFile {
                    path: dest,
                    source: reference.clone(),
                    downloaded: true,
                })
            }
        }
    }

    /// Cache location for a remote file: <models_dir>/<basename of file_name>.
    pub fn target_path(&self, repository: &str, file_name: &str) -> Result<PathBuf> {
        let basename = validate_remote(repository, file_name)?;
        Ok(self.models_dir().join(basename))
    }

    /// GGUF file names present in the model cache, sorted.
    pub fn cached_models(&self) -> Result<Vec<String>> {
        let dir = self.models_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut models = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && has_model_extension(&path) {
                if let Some(name) = path.file_name() {
                    models.push(name.to_string_lossy().into_owned());
                }
            }
        }
        models.sort();
        Ok(models)
    }

    fn download(&self, url: &str, dest: &Path, token: Option<&str>, expected_sha256: Option<&str>) -> Result<()> {
        log::info!("Downloading {} to {}", url, dest.display());

        let mut request = self.agent.get(url);
        if let Some(token) = token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        let resp = match request.call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(status, resp)) => {
                log::error!("HTTP {} downloading {}", status, url);
                return Err(EmbedderError::Download {
                    url: url.to_string(),
                    status,
                    reason: resp.status_text().to_string(),
                });
            }
            Err(ureq::Error::Transport(t)) => {
                log::error!("Transport error downloading {}: {}", url, t);
                return Err(EmbedderError::Transport {
                    url: url.to_string(),
                    message: t.to_string(),
                });
            }
        };

        let status = resp.status();
        if !(200..300).contains(&status) {
            return Err(EmbedderError::Download {
                url: url.to_string(),
                status,
                reason: resp.status_text().to_string(),
            });
        }

        let staging = staging_path(dest);
        let written = self
            .stream_to_file(resp.into_reader(), &staging, url)
            .and_then(|(bytes, actual)| {
                if let Some(expected) = expected_sha256 {
                    verify_sha256(dest, expected, actual)?;
                }
                Ok(bytes)
            });

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&staging) {
                    log::warn!("Failed to remove staging file {}: {}", staging.display(), rm);
                }
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, dest) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        log::info!("Model download complete: {} ({} bytes)", dest.display(), bytes);
        Ok(())
    }

    /// Hex SHA256 of a file already on disk, read in the configured chunk size.
    fn file_sha256(&self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Streams the body into `path` in fixed-size chunks. Returns (bytes, sha256 hex).
    fn stream_to_file(&self, mut reader: impl Read, path: &Path, url: &str) -> Result<(u64, String)> {
        let mut file = fs::File::create(path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut total: u64 = 0;

        loop {
            let n = reader.read(&mut buf).map_err(|e| EmbedderError::Transport {
                url: url.to_string(),
                message: format!("failed reading response body: {e}"),
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            total += n as u64;
        }

        file.flush()?;
        file.sync_all()?;
        Ok((total, hex::encode(hasher.finalize())))
    }
}

fn verify_sha256(file: &Path, expected: &str, actual: String) -> Result<()> {
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(EmbedderError::Integrity {
            file: file.display().to_string(),
            expected: expected.trim().to_string(),
            actual,
        });
    }
    log::info!("SHA256 verified for {} ({})", file.display(), &actual[..12]);
    Ok(())
}

/// `<endpoint>/<repository>/resolve/main/<file_name>`
pub fn download_url(endpoint: &str, repository: &str, file_name: &str) -> String {
    format!(
        "{}/{}/resolve/main/{}",
        endpoint.trim_end_matches('/'),
        repository.trim_matches('/'),
        file_name.trim_start_matches('/')
    )
}

/// Explicit token first, then the environment one; blank tokens count as absent.
pub fn effective_token<'a>(explicit: Option<&'a str>, env: Option<&'a str>) -> Option<&'a str> {
    explicit
        .filter(|t| !t.trim().is_empty())
        .or_else(|| env.filter(|t| !t.trim().is_empty()))
}

fn validate_remote(repository: &str, file_name: &str) -> Result<String> {
    if repository.trim().is_empty() || file_name.trim().is_empty() {
        return Err(EmbedderError::Configuration(
            "repository and model file are required".to_string(),
        ));
    }
    if file_name.split(['/', '\\']).any(|part| part == "..") || repository.contains("..") {
        return Err(EmbedderError::Configuration(format!(
            "invalid model file name: {file_name}"
        )));
    }
    let path = Path::new(file_name);
    if !has_model_extension(path) {
        return Err(EmbedderError::Configuration(format!(
            "model file must be a .{} file: {file_name}",
            config::cache::MODEL_FILE_EXTENSION
        )));
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| EmbedderError::Configuration(format!("invalid model file name: {file_name}")))
}

fn has_model_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(config::cache::MODEL_FILE_EXTENSION))
        .unwrap_or(false)
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest.file_name().unwrap_or_default().to_string_lossy();
    dest.with_file_name(format!(
        "{}.{}.{}",
        name,
        std::process::id(),
        config::cache::STAGING_SUFFIX
    ))
}
