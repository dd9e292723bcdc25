//! Admission rules for the tally usage ledger.
//!
//! This crate decides whether a candidate block may join a chain:
//! - Structural validation (required fields, monotonic values, digests)
//! - Parent linkage
//! - Threshold signature quorum over a registry of authorized keys
//!
//! # Example
//!
//! ```rust,no_run
//! use tally_consensus::{evaluate_quorum, AuthorizedKeys, BlockValidator};
//! use tally_core::{Block, Keypair, UsageUpdate, ZERO_HASH};
//!
//! let alice = Keypair::generate();
//! let bob = Keypair::generate();
//! let authorized = AuthorizedKeys::from_keys([&alice.public_key, &bob.public_key]);
//!
//! let update = UsageUpdate::new("can-1", 0, 10, "admin");
//! let block = Block::build(update, ZERO_HASH, [&alice, &bob]).unwrap();
//!
//! BlockValidator::validate_structure(&block).unwrap();
//! let outcome = evaluate_quorum(
//!     &block.hash,
//!     &block.signatures,
//!     &block.signer_keys,
//!     &authorized,
//!     2,
//! );
//! assert!(outcome.accepted);
//! ```

pub mod quorum;
pub mod validator;

// Re-export commonly used types
pub use quorum::{evaluate_quorum, AuthorizedKeys, ConsensusError, QuorumOutcome};
pub use validator::{BlockValidator, ValidationError};
