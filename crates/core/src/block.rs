//! Usage-update blocks and the block builder.

use crate::canonical;
use crate::crypto::{CryptoError, Keypair};
use crate::hash::Hash;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur while building or decoding a block.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("usage must increase (old value {old}, new value {new})")]
    NonIncreasing { old: u64, new: u64 },

    #[error("subject id must not be empty")]
    EmptySubject,

    #[error("author must not be empty")]
    EmptyAuthor,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid block encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BlockError>;

/// A single monotonic usage update, before it is linked into a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageUpdate {
    /// Identifier of the metered resource.
    pub subject_id: String,
    /// Value recorded before this update.
    pub old_value: u64,
    /// Value recorded by this update.
    pub new_value: u64,
    /// Submitting party.
    pub author: String,
    /// Fixed timestamp; the builder stamps the current time when `None`.
    pub timestamp: Option<String>,
}

impl UsageUpdate {
    pub fn new(
        subject_id: impl Into<String>,
        old_value: u64,
        new_value: u64,
        author: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            old_value,
            new_value,
            author: author.into(),
            timestamp: None,
        }
    }

    /// Pin the timestamp instead of using the current time.
    pub fn at(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Check the update's own invariants.
    pub fn validate(&self) -> Result<()> {
        if self.subject_id.is_empty() {
            return Err(BlockError::EmptySubject);
        }
        if self.author.is_empty() {
            return Err(BlockError::EmptyAuthor);
        }
        if self.new_value <= self.old_value {
            return Err(BlockError::NonIncreasing {
                old: self.old_value,
                new: self.new_value,
            });
        }
        Ok(())
    }
}

/// One hash-linked ledger entry, in its wire form.
///
/// `signatures[i]` was produced by the key in `signer_keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Identifier of the metered resource.
    pub subject_id: String,
    /// Value before the update.
    pub old_value: u64,
    /// Value after the update.
    pub new_value: u64,
    /// Submitting party.
    pub author: String,
    /// Hex hash of the previous block, or `ZERO_HASH`.
    pub prev_hash: String,
    /// Hex content hash of this block.
    pub hash: String,
    /// Hex-encoded signatures over the UTF-8 bytes of `hash`.
    pub signatures: Vec<String>,
    /// PEM public keys paired with `signatures`.
    pub signer_keys: Vec<String>,
}

impl Block {
    /// Build a block on top of `prev_hash` and sign it with every identity.
    pub fn build<'a, I>(
        update: UsageUpdate,
        prev_hash: impl Into<String>,
        identities: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Keypair>,
    {
        update.validate()?;

        let timestamp = update
            .timestamp
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));

        let mut block = Self {
            timestamp,
            subject_id: update.subject_id,
            old_value: update.old_value,
            new_value: update.new_value,
            author: update.author,
            prev_hash: prev_hash.into(),
            hash: String::new(),
            signatures: Vec::new(),
            signer_keys: Vec::new(),
        };
        block.hash = block.compute_hash().to_hex();

        for identity in identities {
            block.add_signature(identity)?;
        }

        Ok(block)
    }

    /// Sign the block's hash with one more identity.
    pub fn add_signature(&mut self, identity: &Keypair) -> Result<()> {
        let signature = identity.sign(self.hash.as_bytes());
        self.signatures.push(signature.to_hex());
        self.signer_keys.push(identity.public_key_pem()?);
        Ok(())
    }

    /// Content-bearing fields: everything except the hash and signatures.
    pub fn content_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("timestamp".into(), Value::from(self.timestamp.as_str()));
        fields.insert("subject_id".into(), Value::from(self.subject_id.as_str()));
        fields.insert("old_value".into(), Value::from(self.old_value));
        fields.insert("new_value".into(), Value::from(self.new_value));
        fields.insert("author".into(), Value::from(self.author.as_str()));
        fields.insert("prev_hash".into(), Value::from(self.prev_hash.as_str()));
        fields
    }

    /// Recompute the content hash from the current field values.
    pub fn compute_hash(&self) -> Hash {
        canonical::content_hash(&self.content_fields())
    }

    /// Check whether the stored `hash` matches the content.
    pub fn hash_matches(&self) -> bool {
        self.compute_hash().to_hex() == self.hash
    }

    /// Positional `(signature, signer_key)` pairs.
    pub fn signature_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.signatures
            .iter()
            .zip(&self.signer_keys)
            .map(|(sig, key)| (sig.as_str(), key.as_str()))
    }

    /// Check if this block starts a chain.
    pub fn is_genesis(&self) -> bool {
        self.prev_hash == crate::hash::ZERO_HASH
    }

    /// Decode a block from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode the block to its JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
