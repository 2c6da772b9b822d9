use std::path::{Path, PathBuf};

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use crate::{config, paths};

/// File logs under <cache_root>/logs with size rotation; warnings and errors also go to stderr
/// (stdout carries the native-messaging frames, so nothing may log there).
/// Level comes from RUST_LOG, defaulting to info.
pub fn init_logging(cache_root: &Path) -> anyhow::Result<LoggerHandle> {
    let log_dir = log_dir(cache_root)?;

    let handle = Logger::try_with_env_or_str(config::logging::DEFAULT_LEVEL)?
        .log_to_file(FileSpec::default().directory(&log_dir).basename(config::logging::LOG_FILE_NAME))
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log::info!("{}", "=".repeat(60));
    log::info!("llama-embedder host starting");
    log::info!("Version: {}", config::HOST_VERSION);
    log::info!("Platform: {}", std::env::consts::OS);
    log::info!("Cache root: {}", cache_root.display());
    log::info!("{}", "=".repeat(60));

    Ok(handle)
}

fn log_dir(cache_root: &Path) -> anyhow::Result<PathBuf> {
    let dir = paths::logs_dir(cache_root);
    paths::ensure_dir(&dir).context("failed creating log dir")?;
    Ok(dir)
}
