//! Ledger error taxonomy.

use tally_consensus::ValidationError;
use tally_core::BlockError;
use tally_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::usage::UsageError;

/// Why a candidate block was not appended.
///
/// The first failing admission step decides the variant.
#[derive(Debug, Error)]
pub enum AppendError {
    #[error("malformed block: {0}")]
    MalformedBlock(#[from] ValidationError),

    #[error("hash mismatch (computed {expected}, block claims {actual})")]
    HashMismatch { expected: String, actual: String },

    #[error("stale tip (current tip is {expected}, block extends {actual})")]
    StaleTip { expected: String, actual: String },

    #[error("quorum not met ({valid} of {required} required signatures)")]
    QuorumNotMet { valid: usize, required: usize },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AppendError {
    /// Only a lost append race is worth retrying, with a rebuilt block.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleTip { .. })
    }
}

/// Errors from ledger operations other than a single append.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("append rejected: {0}")]
    Append(#[from] AppendError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("gave up after {attempts} stale-tip retries")]
    RetriesExhausted { attempts: usize },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
