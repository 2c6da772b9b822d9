
use std::path::PathBuf;

use anyhow::Context;

use crate::config;

pub fn home_dir() -> anyhow::Result<PathBuf> {
    if let Ok(v) = std::env::var("HOME") {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    // Windows fallback
    if let Ok(v) = std::env::var("USERPROFILE") {
        if !v.is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    anyhow::bail!("cannot determine home directory (neither HOME nor USERPROFILE is set)")
}

/// Cache root: $LLAMA_CACHE_DIR, else ~/.cache/llama_cache.
pub fn default_cache_root() -> anyhow::Result<PathBuf> {
    cache_root_from(std::env::var(config::cache::CACHE_DIR_ENV).ok())
}

/// Cache root for an already-read LLAMA_CACHE_DIR value; blank counts as unset.
pub fn cache_root_from(cache_dir_env: Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(v) = cache_dir_env.filter(|v| !v.trim().is_empty()) {
        return Ok(PathBuf::from(v));
    }
    let home = home_dir().context("cannot determine cache directory")?;
    Ok(home.join(config::cache::CACHE_DIR_REL))
}

pub fn models_dir(cache_root: &std::path::Path) -> PathBuf {
    cache_root.join(config::cache::MODELS_SUBDIR)
}

pub fn logs_dir(cache_root: &std::path::Path) -> PathBuf {
    cache_root.join(config::cache::LOGS_SUBDIR)
}

pub fn ensure_dir(dir: &std::path::Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create dir {}", dir.display()))
}
