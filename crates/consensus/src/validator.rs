//! Structural block validation rules.
//!
//! These checks need nothing but the block itself (plus the expected parent
//! hash for linkage) and run before any signature is looked at.

use chrono::{DateTime, NaiveDateTime};
use tally_core::{is_hex_digest, Block};
use thiserror::Error;

/// Errors that can occur during validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("timestamp is not ISO-8601: {0:?}")]
    InvalidTimestamp(String),

    #[error("usage must increase (old value {old}, new value {new})")]
    NonIncreasing { old: u64, new: u64 },

    #[error("field `{0}` is not a 64-character lowercase hex digest")]
    InvalidDigest(&'static str),

    #[error("{signatures} signatures but {keys} signer keys")]
    SignatureCountMismatch { signatures: usize, keys: usize },

    #[error("block prev_hash mismatch (expected {expected}, got {got})")]
    InvalidPrevHash { expected: String, got: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Block validator.
pub struct BlockValidator;

impl BlockValidator {
    /// Validate that every required field is present and well formed.
    pub fn validate_structure(block: &Block) -> Result<()> {
        if block.timestamp.is_empty() {
            return Err(ValidationError::EmptyField("timestamp"));
        }
        if block.subject_id.is_empty() {
            return Err(ValidationError::EmptyField("subject_id"));
        }
        if block.author.is_empty() {
            return Err(ValidationError::EmptyField("author"));
        }
        if !is_iso8601(&block.timestamp) {
            return Err(ValidationError::InvalidTimestamp(block.timestamp.clone()));
        }

        if block.new_value <= block.old_value {
            return Err(ValidationError::NonIncreasing {
                old: block.old_value,
                new: block.new_value,
            });
        }

        if !is_hex_digest(&block.prev_hash) {
            return Err(ValidationError::InvalidDigest("prev_hash"));
        }
        if !is_hex_digest(&block.hash) {
            return Err(ValidationError::InvalidDigest("hash"));
        }

        if block.signatures.len() != block.signer_keys.len() {
            return Err(ValidationError::SignatureCountMismatch {
                signatures: block.signatures.len(),
                keys: block.signer_keys.len(),
            });
        }

        Ok(())
    }

    /// Validate that the block links onto `parent_hash`.
    pub fn validate_extends(block: &Block, parent_hash: &str) -> Result<()> {
        if block.prev_hash != parent_hash {
            return Err(ValidationError::InvalidPrevHash {
                expected: parent_hash.to_string(),
                got: block.prev_hash.clone(),
            });
        }
        Ok(())
    }
}

/// Accepts RFC 3339 as well as naive `YYYY-MM-DDTHH:MM:SS[.fraction]`.
fn is_iso8601(timestamp: &str) -> bool {
    DateTime::parse_from_rfc3339(timestamp).is_ok()
        || NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}
