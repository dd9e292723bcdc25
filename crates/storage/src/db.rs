//! sled database wrapper with serialization helpers, and the storage error type.

use sled::transaction::{ConflictableTransactionResult, TransactionError, TransactionalTree};
use sled::Db;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key material error: {0}")]
    Crypto(#[from] tally_core::CryptoError),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid name {0:?}: use letters, digits, '-' or '_'")]
    InvalidName(String),

    #[error("Corrupt chain store: {0}")]
    Corrupt(String),

    /// The persisted chain is not a prefix of the chain being saved.
    #[error("Persisted chain moved: {stored_len} blocks ending at {stored_tip}")]
    Conflict {
        stored_len: usize,
        stored_tip: String,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Wrapper around sled database with serialization helpers.
///
/// Clones share the same open database.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Run `f` as one serializable transaction.
    ///
    /// sled may call `f` more than once on conflicts; an `Abort` from `f`
    /// ends the transaction and is returned as-is.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<T, StorageError>,
    {
        self.db.transaction(f).map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StorageError::Database(e),
        })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Create a prefixed key for blocks by chain position.
    /// Format: "block:index:{index}"
    pub fn block_index_key(index: usize) -> Vec<u8> {
        format!("block:index:{}", index).into_bytes()
    }
}
