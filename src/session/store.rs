//! Persisted connection settings.
//!
//! The file holds one JSON object (the operator-settable subset of
//! [`ConnectionConfig`](crate::core::ConnectionConfig)) and is overwritten
//! wholesale via temp file + rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::core::{PersistedConfig, WebSocketError, WebSocketResult};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone)]
enum Backend {
    File(PathBuf),
    Memory(Arc<Mutex<Option<PersistedConfig>>>),
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    backend: Backend,
}

impl ConfigStore {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
        }
    }

    /// Store that never touches the filesystem.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(None))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(path) => Some(path),
            Backend::Memory(_) => None,
        }
    }

    /// Missing file yields `None`; unreadable or malformed content is logged
    /// and also yields `None`.
    pub async fn load(&self) -> Option<PersistedConfig> {
        let path = match &self.backend {
            Backend::File(path) => path,
            Backend::Memory(slot) => {
                return slot.lock().unwrap_or_else(|e| e.into_inner()).clone();
            }
        };

        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no saved configuration");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not read saved configuration");
                return None;
            }
        };

        match sonic_rs::from_slice::<PersistedConfig>(&raw) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed saved configuration");
                None
            }
        }
    }

    pub async fn save(&self, config: &PersistedConfig) -> WebSocketResult<()> {
        let path = match &self.backend {
            Backend::File(path) => path,
            Backend::Memory(slot) => {
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
                return Ok(());
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = sonic_rs::to_string_pretty(config)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Remove the saved configuration. A missing file is not an error.
    pub async fn delete(&self) -> WebSocketResult<()> {
        match &self.backend {
            Backend::File(path) => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(WebSocketError::Io(err)),
            },
            Backend::Memory(slot) => {
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
                Ok(())
            }
        }
    }
}
