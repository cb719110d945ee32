use std::fs;
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::crypto;
use crate::models::AppData;
use crate::normalize::normalize;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record is sealed but no passphrase is configured")]
    PassphraseRequired,
    #[error("data directory not found")]
    NoDataDir,
}

/// The single per-device record holding the canonical data.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
    passphrase: Option<String>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.filter(|p| !p.is_empty()),
        }
    }

    /// Resolve the record path from configuration, falling back to the
    /// platform data directory.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let dir = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .ok_or(StorageError::NoDataDir)?
                .join("cycleflow"),
        };
        Ok(Self::new(dir.join(&config.file_name), config.passphrase.clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the record. Sealed when a passphrase is configured.
    pub fn save(&self, data: &AppData) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(data)?;
        let bytes = match &self.passphrase {
            Some(passphrase) => crypto::seal(passphrase, &json)?,
            None => json,
        };
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// Read and normalize the record. A missing record yields defaults, as
    /// does an unreadable plaintext blob. A sealed record that cannot be
    /// opened is an error so it is never overwritten with defaults.
    pub fn load(&self) -> Result<AppData, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no local record, starting fresh");
                return Ok(AppData::default());
            }
            Err(e) => return Err(e.into()),
        };

        let raw = if crypto::is_sealed(&bytes) {
            let passphrase = self
                .passphrase
                .as_deref()
                .ok_or(StorageError::PassphraseRequired)?;
            let plaintext = crypto::open(passphrase, &bytes)?;
            serde_json::from_slice::<serde_json::Value>(&plaintext)
        } else {
            serde_json::from_slice::<serde_json::Value>(&bytes)
        };

        match raw {
            Ok(value) => Ok(normalize(&value)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "local record unreadable, using defaults");
                Ok(AppData::default())
            }
        }
    }

    pub fn wipe(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
