use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::gmail::oauth::{Credential, TokenStore};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode credential: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("client secret file {0} has neither an \"installed\" nor a \"web\" section")]
    MissingClientSection(PathBuf),
}

/// OAuth client identity from Google's downloaded `credentials.json`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ClientSecretsFile =
            serde_json::from_str(&contents).map_err(|source| CredentialError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        file.installed
            .or(file.web)
            .ok_or_else(|| CredentialError::MissingClientSection(path.to_path_buf()))
    }
}

/// Single-file credential cache. Also the `TokenStore` the Gmail client
/// persists refreshed credentials through.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    path: PathBuf,
}

impl CredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(None)` when the cache file does not exist.
    pub fn load(&self) -> Result<Option<Credential>, CredentialError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
            path: self.path.clone(),
            source,
        })?;
        let credential =
            serde_json::from_str(&contents).map_err(|source| CredentialError::Parse {
                path: self.path.clone(),
                source,
            })?;

        debug!(path = %self.path.display(), "loaded cached credential");
        Ok(Some(credential))
    }

    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let write_err = |source| CredentialError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let body = serde_json::to_string_pretty(credential)?;
        fs::write(&self.path, body).map_err(write_err)?;
        restrict_permissions(&self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), "saved credential");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl TokenStore for CredentialCache {
    type Error = CredentialError;

    async fn save_tokens(&self, credential: &Credential) -> Result<(), Self::Error> {
        self.save(credential)
    }
}
