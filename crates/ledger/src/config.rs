//! Ledger configuration and data directory layout.
//!
//! ```text
//! <data-dir>/
//!   config.json
//!   chain.json | chain.db/
//!   keys/identities/<name>.pem
//!   keys/authorized/<name>.pem
//! ```

use crate::error::Result;
use crate::ledger::Ledger;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tally_consensus::AuthorizedKeys;
use tally_storage::{ChainPersistence, JsonChainFile, KeyStore, SledChainStore};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.json";
pub const CHAIN_JSON_FILE: &str = "chain.json";
pub const CHAIN_DB_DIR: &str = "chain.db";
pub const KEYS_DIR: &str = "keys";

/// Default number of distinct authorized signatures per block.
pub const DEFAULT_REQUIRED_SIGNATURES: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("required_signatures must be at least 1")]
    InvalidThreshold,

    #[error("no ledger at {0} (run `tally init` first)")]
    NotInitialized(PathBuf),
}

/// Where the chain is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sled,
}

/// Settings stored in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Distinct authorized signatures a block needs.
    pub required_signatures: usize,
    /// Chain persistence backend.
    pub storage: StorageBackend,
    /// Name recorded in the `author` field of new blocks.
    pub author: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            required_signatures: DEFAULT_REQUIRED_SIGNATURES,
            storage: StorageBackend::default(),
            author: "admin".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.required_signatures == 0 {
            return Err(ConfigError::InvalidThreshold);
        }
        Ok(())
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A ledger data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn is_initialized(&self) -> bool {
        self.config_path().exists()
    }

    /// Create the directory and key layout and write `config`.
    pub fn init(&self, config: &LedgerConfig) -> Result<KeyStore> {
        fs::create_dir_all(&self.root).map_err(|source| ConfigError::Io {
            path: self.root.clone(),
            source,
        })?;
        config.save(&self.config_path())?;
        let keys = self.key_store();
        keys.init()?;
        Ok(keys)
    }

    pub fn load_config(&self) -> Result<LedgerConfig> {
        if !self.is_initialized() {
            return Err(ConfigError::NotInitialized(self.root.clone()).into());
        }
        Ok(LedgerConfig::load(&self.config_path())?)
    }

    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(self.root.join(KEYS_DIR))
    }

    /// Snapshot of the authorized key registry.
    pub fn authorized_keys(&self) -> Result<AuthorizedKeys> {
        let keys = self.key_store().load_authorized()?;
        Ok(AuthorizedKeys::from_keys(&keys))
    }

    /// Path of the chain for `backend`.
    pub fn chain_path(&self, backend: StorageBackend) -> PathBuf {
        match backend {
            StorageBackend::Json => self.root.join(CHAIN_JSON_FILE),
            StorageBackend::Sled => self.root.join(CHAIN_DB_DIR),
        }
    }

    pub fn open_store(&self, backend: StorageBackend) -> Result<Box<dyn ChainPersistence>> {
        let path = self.chain_path(backend);
        Ok(match backend {
            StorageBackend::Json => Box::new(JsonChainFile::new(path)),
            StorageBackend::Sled => Box::new(SledChainStore::open(path)?),
        })
    }

    /// Load config and open the ledger it describes.
    pub fn open_ledger(&self) -> Result<(LedgerConfig, Ledger)> {
        let config = self.load_config()?;
        let ledger = Ledger::from_boxed(self.open_store(config.storage)?)?;
        Ok((config, ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use tally_core::Keypair;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.required_signatures, 2);
        assert_eq!(config.storage, StorageBackend::Json);
        assert_eq!(config.author, "admin");
    }

    #[test]
    fn test_missing_fields_default() {
        let config: LedgerConfig = serde_json::from_str(r#"{"storage":"sled"}"#).unwrap();
        assert_eq!(config.storage, StorageBackend::Sled);
        assert_eq!(config.required_signatures, 2);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"required_signatures":0}"#).unwrap();

        assert!(matches!(
            LedgerConfig::load(&path),
            Err(ConfigError::InvalidThreshold)
        ));
    }

    #[test]
    fn test_uninitialized_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path().join("absent"));
        assert!(matches!(
            data.open_ledger(),
            Err(LedgerError::Config(ConfigError::NotInitialized(_)))
        ));
    }

    #[test]
    fn test_init_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let config = LedgerConfig {
            required_signatures: 1,
            ..LedgerConfig::default()
        };

        let keys = data.init(&config).unwrap();
        keys.authorize("node", &Keypair::generate().public_key).unwrap();

        let (loaded, ledger) = data.open_ledger().unwrap();
        assert_eq!(loaded, config);
        assert!(ledger.is_empty());
        assert_eq!(data.authorized_keys().unwrap().len(), 1);
    }
}
