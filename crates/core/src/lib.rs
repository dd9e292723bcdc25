//! Core primitives for the tally usage ledger.
//!
//! This crate provides the fundamental types used throughout the ledger:
//! - SHA-256 content hashing
//! - The canonical block encoding that every ledger holder must agree on
//! - Ed25519 signing identities with PEM key encoding
//! - Blocks and the block builder

pub mod block;
pub mod canonical;
pub mod crypto;
pub mod hash;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockError, UsageUpdate};
pub use crypto::{verify_signature, CryptoError, KeyBytes, Keypair, PublicKey, Signature};
pub use hash::{hash, is_hex_digest, Hash, H256, HASH_HEX_LEN, ZERO_HASH};
