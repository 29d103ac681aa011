//! Credential storage on the client
//!
//! Two policies, never mixed:
//!
//! - [`FileCredentialStore`] persists to `~/.config/rollcall/credentials.json`
//!   and survives restarts;
//! - [`MemoryCredentialStore`] keeps the credential in process memory only,
//!   seeded from the embedding context at startup. It has no path and no
//!   way to reach the disk.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credential::Credential;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration directory not found")]
    NoConfigDir,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Where credentials live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePolicy {
    Persistent,
    Ephemeral,
}

/// Holds at most one credential
pub trait CredentialStore: Send + Sync {
    fn policy(&self) -> StoragePolicy;
    fn load(&self) -> Option<Credential>;
    fn save(&self, credential: &Credential) -> StoreResult<()>;
    /// Drop all credential state
    fn clear(&self) -> StoreResult<()>;
}

/// Stored data structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredData {
    credential: Option<Credential>,
}

/// Credential store backed by a JSON file
pub struct FileCredentialStore {
    path: PathBuf,
    data: RwLock<StoredData>,
}

impl FileCredentialStore {
    /// Open the store at the default path, loading any saved credential
    pub fn new() -> StoreResult<Self> {
        Self::with_path(Self::default_path()?)
    }

    /// Open the store at a specific path
    pub fn with_path(path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded credentials from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse credential file, starting fresh: {}", e);
                    StoredData::default()
                }
            }
        } else {
            debug!("No saved credentials");
            StoredData::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Default path (~/.config/rollcall/credentials.json)
    pub fn default_path() -> StoreResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(config_dir.join("rollcall").join("credentials.json"))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn write(&self, data: &StoredData) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved credentials to {:?}", self.path);
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn policy(&self) -> StoragePolicy {
        StoragePolicy::Persistent
    }

    fn load(&self) -> Option<Credential> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.credential.clone()
    }

    fn save(&self, credential: &Credential) -> StoreResult<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.credential = Some(credential.clone());
        self.write(&data)
    }

    fn clear(&self) -> StoreResult<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.credential = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        info!("Cleared saved credentials");
        Ok(())
    }
}

/// Credential store living only in process memory
#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from credentials handed over by the embedding context
    pub fn seeded(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn policy(&self) -> StoragePolicy {
        StoragePolicy::Ephemeral
    }

    fn load(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn save(&self, credential: &Credential) -> StoreResult<()> {
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
