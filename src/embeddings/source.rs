// source.rs — Model references and resolved cache entries.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{EmbedderError, Result};

/// Where a model comes from: a local file, or a file inside a remote repository.
#[derive(Clone, PartialEq, Eq)]
pub enum ModelReference {
    Local(PathBuf),
    Remote {
        repository: String,
        file_name: String,
        token: Option<String>,
        /// Expected hex SHA256 (case-insensitive) of the file, checked after download.
        sha256: Option<String>,
    },
}

impl ModelReference {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        ModelReference::Local(path.into())
    }

    pub fn remote(repository: impl Into<String>, file_name: impl Into<String>) -> Self {
        ModelReference::Remote {
            repository: repository.into(),
            file_name: file_name.into(),
            token: None,
            sha256: None,
        }
    }

    /// Mirrors the facade's construction parameters: with a repository the
    /// model path names a file inside it, otherwise it is a local path.
    pub fn from_parts(model_path: &str, repository: Option<&str>, token: Option<&str>) -> Self {
        match repository {
            Some(repo) => ModelReference::Remote {
                repository: repo.to_string(),
                file_name: model_path.to_string(),
                token: token.map(str::to_string),
                sha256: None,
            },
            None => ModelReference::Local(PathBuf::from(model_path)),
        }
    }

    /// No-op for local references.
    pub fn with_token(mut self, value: impl Into<String>) -> Self {
        if let ModelReference::Remote { token, .. } = &mut self {
            *token = Some(value.into());
        }
        self
    }

    /// No-op for local references.
    pub fn with_sha256(mut self, value: impl Into<String>) -> Self {
        if let ModelReference::Remote { sha256, .. } = &mut self {
            *sha256 = Some(value.into());
        }
        self
    }

    /// Rejects a directory without a repository. Performs no network access.
    pub fn validate(&self) -> Result<()> {
        if let ModelReference::Local(path) = self {
            if path.is_dir() {
                return Err(EmbedderError::Configuration(format!(
                    "ambiguous model path: directory given without a source repository ({})",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ModelReference::Remote { .. })
    }
}

// Manual Debug so access tokens never end up in logs.
impl fmt::Debug for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelReference::Local(path) => f.debug_tuple("Local").field(path).finish(),
            ModelReference::Remote {
                repository,
                file_name,
                token,
                sha256,
            } => f
                .debug_struct("Remote")
                .field("repository", repository)
                .field("file_name", file_name)
                .field("token", &token.as_ref().map(|_| "<redacted>"))
                .field("sha256", sha256)
                .finish(),
        }
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelReference::Local(path) => write!(f, "{}", path.display()),
            ModelReference::Remote {
                repository,
                file_name,
                ..
            } => write!(f, "{repository}/{file_name}"),
        }
    }
}

/// A model file available on local disk, plus where it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelFile {
    pub path: PathBuf,
    pub source: ModelReference,
    /// True only when this resolution fetched the file over the network.
    pub downloaded: bool,
}

impl CachedModelFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
