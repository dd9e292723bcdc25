//! Chain persistence backends.
//!
//! A backend stores the accepted sequence of blocks as one ordered list.
//! Saving is all-or-nothing per call: a crash mid-save leaves the previously
//! saved version readable. A save only goes through if it extends what is
//! persisted, so several ledgers sharing one store cannot overwrite each
//! other's blocks.

use crate::db::{Result, Storage, StorageError};
use sled::transaction::ConflictableTransactionError;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tally_core::{Block, ZERO_HASH};
use tempfile::NamedTempFile;
use tracing::debug;

/// Key holding the number of persisted blocks.
const CHAIN_LENGTH_KEY: &[u8] = b"chain:length";

/// Loads and saves the ordered block sequence.
pub trait ChainPersistence: Send + Sync {
    /// Load every persisted block, in chain order.
    fn load_chain(&self) -> Result<Vec<Block>>;

    /// Persist `blocks` as the complete chain.
    ///
    /// The persisted chain must be a strict prefix of `blocks`; otherwise
    /// nothing is written and [`StorageError::Conflict`] describes what is
    /// stored now.
    fn save_chain(&self, blocks: &[Block]) -> Result<()>;
}

/// Check that `stored_len` persisted blocks ending at `stored_tip` are a
/// strict prefix of `blocks`.
fn ensure_extends(stored_len: usize, stored_tip: Option<&str>, blocks: &[Block]) -> Result<()> {
    let extends = blocks.len() > stored_len
        && stored_len.checked_sub(1).map(|last| blocks[last].hash.as_str()) == stored_tip;
    if extends {
        return Ok(());
    }
    Err(StorageError::Conflict {
        stored_len,
        stored_tip: stored_tip.unwrap_or(ZERO_HASH).to_string(),
    })
}

// =========================================================================
// JSON file
// =========================================================================

/// The chain as a pretty-printed JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonChainFile {
    path: PathBuf,
}

impl JsonChainFile {
    /// Use the file at `path`; it is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the chain file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock file guarding saves: the chain file name plus `.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from("chain"), |name| name.to_os_string());
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

/// Exclusive advisory lock on a file, released when dropped.
struct FileLock {
    _file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;

        #[cfg(unix)]
        {
            use nix::fcntl::{flock, FlockArg};
            use std::os::unix::io::AsRawFd;

            flock(file.as_raw_fd(), FlockArg::LockExclusive)
                .map_err(|errno| StorageError::io(path, errno.into()))?;
        }

        Ok(Self { _file: file })
    }
}

impl ChainPersistence for JsonChainFile {
    fn load_chain(&self) -> Result<Vec<Block>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        // Held across read, compare and rename.
        let _lock = FileLock::acquire(&self.lock_path())?;
        let stored = self.load_chain()?;
        ensure_extends(stored.len(), stored.last().map(|b| b.hash.as_str()), blocks)?;

        // Write beside the target, then rename over it.
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, blocks)?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StorageError::io(&self.path, e.error))?;

        debug!(path = %self.path.display(), blocks = blocks.len(), "saved chain file");
        Ok(())
    }
}

// =========================================================================
// sled
// =========================================================================

/// The chain in a sled database, one entry per block.
///
/// Layout:
/// - `block:index:{i}` → block `i`
/// - `chain:length` → number of blocks
pub struct SledChainStore {
    storage: Storage,
}

impl SledChainStore {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Storage::open(path)?))
    }

    /// Wrap an already opened database.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Number of persisted blocks.
    pub fn len(&self) -> Result<usize> {
        Ok(self.storage.get::<_, u64>(CHAIN_LENGTH_KEY)?.unwrap_or(0) as usize)
    }

    /// Check if nothing has been persisted yet.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Get a persisted block by index.
    pub fn get_block(&self, index: usize) -> Result<Option<Block>> {
        self.storage.get(Storage::block_index_key(index))
    }
}

impl ChainPersistence for SledChainStore {
    fn load_chain(&self) -> Result<Vec<Block>> {
        let len = self.len()?;
        let mut blocks = Vec::with_capacity(len);
        for index in 0..len {
            let block = self.get_block(index)?.ok_or_else(|| {
                StorageError::Corrupt(format!("block {index} of {len} is missing"))
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Only the blocks beyond the stored length are written, together with
    /// the new length, in one transaction that first re-reads the stored tip.
    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        let written = self.storage.transaction(|tx| {
            let stored = match tx.get(CHAIN_LENGTH_KEY)? {
                Some(bytes) => bincode::deserialize::<u64>(&bytes).map_err(abort)? as usize,
                None => 0,
            };
            let stored_tip = match stored.checked_sub(1) {
                Some(last) => {
                    let bytes = tx.get(Storage::block_index_key(last))?.ok_or_else(|| {
                        abort(StorageError::Corrupt(format!(
                            "block {last} of {stored} is missing"
                        )))
                    })?;
                    Some(bincode::deserialize::<Block>(&bytes).map_err(abort)?.hash)
                }
                None => None,
            };
            ensure_extends(stored, stored_tip.as_deref(), blocks).map_err(abort)?;

            for (index, block) in blocks.iter().enumerate().skip(stored) {
                let value = bincode::serialize(block).map_err(abort)?;
                tx.insert(Storage::block_index_key(index), value)?;
            }
            let length = bincode::serialize(&(blocks.len() as u64)).map_err(abort)?;
            tx.insert(CHAIN_LENGTH_KEY, length)?;
            Ok(blocks.len() - stored)
        })?;
        self.storage.flush()?;

        debug!(written, total = blocks.len(), "saved chain to sled");
        Ok(())
    }
}

fn abort(err: impl Into<StorageError>) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(err.into())
}

// =========================================================================
// Memory
// =========================================================================

/// Keeps the chain in memory only; for tests and throwaway ledgers.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    blocks: Mutex<Vec<Block>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing sequence.
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
        }
    }
}

impl ChainPersistence for MemoryChainStore {
    fn load_chain(&self) -> Result<Vec<Block>> {
        Ok(self
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        let mut stored = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        ensure_extends(stored.len(), stored.last().map(|b| b.hash.as_str()), blocks)?;
        *stored = blocks.to_vec();
        Ok(())
    }
}
