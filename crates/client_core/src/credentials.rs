//! Where the access credential lives between calls (and, for the file store,
//! between launches).

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use shared::protocol::Credential;
use tracing::debug;

use crate::error::ClientError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credential>, ClientError>;
    async fn save(&self, credential: &Credential) -> Result<(), ClientError>;
    async fn clear(&self) -> Result<(), ClientError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Credential>> {
        self.credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, ClientError> {
        Ok(self.slot().clone())
    }

    async fn save(&self, credential: &Credential) -> Result<(), ClientError> {
        *self.slot() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        self.slot().take();
        Ok(())
    }
}

/// JSON file holding a single credential.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.item_sync/credential.json`, or `None` if no home directory can be
    /// resolved.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".item_sync").join("credential.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn store_error(path: &Path, action: &str, err: impl std::fmt::Display) -> ClientError {
    ClientError::CredentialStore(format!(
        "failed to {action} credential file '{}': {err}",
        path.display()
    ))
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, ClientError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(store_error(&self.path, "read", err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| store_error(&self.path, "parse", err))
    }

    async fn save(&self, credential: &Credential) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| store_error(&self.path, "prepare directory for", err))?;
        }
        let raw =
            serde_json::to_vec(credential).map_err(|err| store_error(&self.path, "encode", err))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|err| store_error(&self.path, "write", err))?;
        debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_error(&self.path, "remove", err)),
        }
    }
}
