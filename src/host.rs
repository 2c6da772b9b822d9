// host.rs — Request handlers for the native-messaging embedding host.
//
// One `Embedder` is kept per (repository, model, pooling) so repeated requests reuse the loaded
// engine; normalization is applied per request. Embedders idle for longer than the TTL are
// dropped at the start of each request, and the least recently used one makes room once the
// cap is reached. Requests are handled strictly one at a time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use serde_json::Value;

use crate::config;
use crate::embeddings::{
    Embedder, EmbedderConfig, ModelReference, ModelResolver, NormalizationType, PoolingType, TokenizeOptions,
};
use crate::error::EmbedderError;
use crate::protocol::{ResponseErr, ResponseOk};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EmbedderKey {
    repository: Option<String>,
    model: String,
    pooling: PoolingType,
}

struct LoadedEmbedder {
    embedder: Embedder,
    last_used: Instant,
}

pub struct HostState {
    resolver: ModelResolver,
    embedders: HashMap<EmbedderKey, LoadedEmbedder>,
    idle_ttl: Duration,
    max_loaded: usize,
    pub should_exit: bool,
}

impl HostState {
    pub fn new(resolver: ModelResolver) -> Self {
        Self {
            resolver,
            embedders: HashMap::new(),
            idle_ttl: Duration::from_secs(config::host::EMBEDDER_IDLE_TTL_SECS),
            max_loaded: config::host::MAX_LOADED_EMBEDDERS,
            should_exit: false,
        }
    }

    /// Overrides the idle TTL and the loaded-embedder cap (a cap of 0 is treated as 1).
    pub fn with_limits(mut self, idle_ttl: Duration, max_loaded: usize) -> Self {
        self.idle_ttl = idle_ttl;
        self.max_loaded = max_loaded.max(1);
        self
    }

    pub fn loaded_count(&self) -> usize {
        self.embedders.len()
    }

    /// Drops embedders not used within the idle TTL as of `now`. Returns how many were dropped.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let ttl = self.idle_ttl;
        let before = self.embedders.len();
        self.embedders.retain(|key, loaded| {
            let keep = now.saturating_duration_since(loaded.last_used) < ttl;
            if !keep {
                log::info!("Evicting idle embedder for {} (pooling={})", key.model, key.pooling);
            }
            keep
        });
        before - self.embedders.len()
    }

    fn evict_least_recently_used(&mut self) {
        let oldest = self
            .embedders
            .iter()
            .min_by_key(|(_, loaded)| loaded.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            log::info!("Evicting least recently used embedder for {} (pooling={})", key.model, key.pooling);
            self.embedders.remove(&key);
        }
    }

    fn model_key(&self, params: &Value) -> anyhow::Result<(EmbedderKey, ModelReference, NormalizationType)> {
        let model = str_param(params, "model").context("Missing required parameters: model")?;
        let repository = str_param(params, "repository");
        let token = str_param(params, "token");

        let pooling = parse_param::<PoolingType>(params, "pooling")?.unwrap_or_default();
        let normalization = parse_param::<NormalizationType>(params, "normalization")?.unwrap_or_default();

        let reference = match repository {
            Some(repo) => ModelReference::from_parts(model, Some(repo), token),
            None => ModelReference::local(self.local_model_path(model)),
        };

        let key = EmbedderKey {
            repository: repository.map(str::to_string),
            model: model.to_string(),
            pooling,
        };
        Ok((key, reference, normalization))
    }

    /// Bare file names that are not paths on disk are looked up in the model cache.
    fn local_model_path(&self, model: &str) -> PathBuf {
        let path = PathBuf::from(model);
        let is_bare_name = !model.contains(['/', '\\']) && !model.contains("..");
        if !path.exists() && is_bare_name {
            let cached = self.resolver.models_dir().join(model);
            if cached.is_file() {
                log::debug!("Serving {} from model cache", model);
                return cached;
            }
        }
        path
    }

    /// Loaded embedder for the request's model and pooling, plus the requested normalization.
    fn embedder_for(&mut self, params: &Value) -> anyhow::Result<(&Embedder, NormalizationType)> {
        let (key, reference, normalization) = self.model_key(params)?;
        if !self.embedders.contains_key(&key) {
            let cfg = EmbedderConfig::new(key.pooling, normalization);
            let embedder = Embedder::new(reference, cfg, &self.resolver)?;
            while self.embedders.len() >= self.max_loaded {
                self.evict_least_recently_used();
            }
            log::info!("Loaded embedder #{} for {}", self.embedders.len() + 1, key.model);
            self.embedders.insert(
                key.clone(),
                LoadedEmbedder {
                    embedder,
                    last_used: Instant::now(),
                },
            );
        }
        let loaded = self
            .embedders
            .get_mut(&key)
            .context("embedder missing right after insert")?;
        loaded.last_used = Instant::now();
        Ok((&loaded.embedder, normalization))
    }
}

/// Dispatch one request. Handler failures propagate so the caller can log them and reply with
/// an error frame (see [`error_response`]).
pub fn handle_request(state: &mut HostState, method: &str, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    state.evict_idle(Instant::now());

    let result = match method {
        "hello" => handle_hello(state, params),
        "health" => handle_health(),
        "models" => handle_models(state),
        "download" => handle_download(state, params),
        "embed" => handle_embed(state, params),
        "tokenize" => handle_tokenize(state, params),
        "metadata" => handle_metadata(state, params),
        "unload" => handle_unload(state, params),
        "shutdown" => handle_shutdown(state),
        _ => {
            return Ok(serde_json::to_value(ResponseErr {
                id: msg_id.to_string(),
                error: format!("Unknown method: {method}"),
                kind: None,
            })?)
        }
    }?;

    Ok(serde_json::to_value(ResponseOk {
        id: msg_id.to_string(),
        result,
    })?)
}

/// Error frame for a failed handler; embedder failures carry their error class.
pub fn error_response(msg_id: &str, err: &anyhow::Error) -> Value {
    let kind = err
        .downcast_ref::<EmbedderError>()
        .map(|e| e.kind().to_string());
    serde_json::to_value(ResponseErr {
        id: msg_id.to_string(),
        error: format!("{err:#}"),
        kind,
    })
    .unwrap_or_else(|_| serde_json::json!({ "id": msg_id, "error": err.to_string() }))
}

fn handle_hello(state: &HostState, params: &Value) -> anyhow::Result<Value> {
    let client_version = str_param(params, "clientVersion").unwrap_or("unknown");
    log::info!(
        "Hello from client version {}, responding with host version {}",
        client_version,
        config::HOST_VERSION
    );

    Ok(serde_json::json!({
        "type": "hello-response",
        "hostVersion": config::HOST_VERSION,
        "platform": std::env::consts::OS,
        "cacheDir": state.resolver.config().cache_root.to_string_lossy(),
        "clientVersion": client_version
    }))
}

fn handle_health() -> anyhow::Result<Value> {
    Ok(serde_json::json!({
        "status": "running",
        "time": chrono::Utc::now().timestamp()
    }))
}

fn handle_models(state: &HostState) -> anyhow::Result<Value> {
    let models = state.resolver.cached_models()?;
    Ok(serde_json::json!({ "models": models, "loaded": state.loaded_count() }))
}

fn handle_download(state: &HostState, params: &Value) -> anyhow::Result<Value> {
    let repository = str_param(params, "repository").context("Missing required parameters: repository")?;
    let file = str_param(params, "file").context("Missing required parameters: file")?;

    let mut reference = ModelReference::from_parts(file, Some(repository), str_param(params, "token"));
    if let Some(sha256) = str_param(params, "sha256") {
        reference = reference.with_sha256(sha256);
    }

    let cached = state.resolver.resolve(&reference)?;
    Ok(serde_json::json!({
        "path": cached.path.to_string_lossy(),
        "downloaded": cached.downloaded
    }))
}

fn handle_embed(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let texts = non_empty_texts(params)?;
    let (embedder, normalization) = state.embedder_for(params)?;
    let embeddings = embedder.embed_texts_with(&texts, normalization)?;
    log::info!("Embedded {} texts", embeddings.len());
    Ok(serde_json::json!({ "embeddings": embeddings }))
}

fn handle_tokenize(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let texts = non_empty_texts(params)?;
    let defaults = TokenizeOptions::default();
    let options = TokenizeOptions {
        add_special_tokens: bool_param(params, "addSpecialTokens").unwrap_or(defaults.add_special_tokens),
        enable_padding: bool_param(params, "enablePadding").unwrap_or(defaults.enable_padding),
    };
    let (embedder, _) = state.embedder_for(params)?;
    let batch = embedder.tokenize(&texts, options)?;
    Ok(serde_json::to_value(batch)?)
}

fn handle_metadata(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let (embedder, _) = state.embedder_for(params)?;
    Ok(serde_json::to_value(embedder.metadata())?)
}

fn handle_unload(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let model = str_param(params, "model").context("Missing required parameters: model")?;
    let repository = str_param(params, "repository");

    let before = state.embedders.len();
    state
        .embedders
        .retain(|k, _| !(k.model == model && k.repository.as_deref() == repository));
    let unloaded = before - state.embedders.len();
    log::info!("Unloaded {} embedder(s) for {}", unloaded, model);

    Ok(serde_json::json!({ "ok": true, "unloaded": unloaded }))
}

fn handle_shutdown(state: &mut HostState) -> anyhow::Result<Value> {
    state.should_exit = true;
    Ok(serde_json::json!({ "ok": true }))
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn bool_param(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Accepts either a name (`"mean"`) or an integer tag (`1`).
fn parse_param<T>(params: &Value, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr<Err = EmbedderError>,
{
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.parse()?)),
        Some(Value::Number(n)) => Ok(Some(n.to_string().parse()?)),
        Some(other) => bail!("invalid {key}: {other}"),
    }
}

/// Batch from `texts`; a missing or empty batch fails before any model is resolved or loaded.
fn non_empty_texts(params: &Value) -> anyhow::Result<Vec<String>> {
    let texts = texts_param(params)?;
    if texts.is_empty() {
        return Err(EmbedderError::empty_texts().into());
    }
    Ok(texts)
}

fn texts_param(params: &Value) -> anyhow::Result<Vec<String>> {
    let Some(items) = params.get("texts") else {
        return Ok(Vec::new());
    };
    let items = items.as_array().context("texts must be an array of strings")?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string).context("texts must be an array of strings"))
        .collect()
}
