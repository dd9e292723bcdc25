//! Append-only, quorum-signed usage ledger.
//!
//! # Example
//!
//! ```rust
//! use tally_consensus::AuthorizedKeys;
//! use tally_core::{Keypair, UsageUpdate};
//! use tally_ledger::Ledger;
//!
//! let signers = [Keypair::generate(), Keypair::generate()];
//! let authorized = AuthorizedKeys::from_keys(signers.iter().map(|kp| &kp.public_key));
//!
//! let ledger = Ledger::in_memory();
//! let block = ledger
//!     .build_next(UsageUpdate::new("printer-3", 0, 120, "admin"), &signers)
//!     .unwrap();
//! ledger.append(block, &authorized, 2).unwrap();
//!
//! assert_eq!(ledger.verify_all(&authorized, 2).summary(), (true, None));
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod usage;
pub mod verify;

pub use config::{ConfigError, DataDir, LedgerConfig, StorageBackend, DEFAULT_REQUIRED_SIGNATURES};
pub use error::{AppendError, LedgerError, Result};
pub use ledger::Ledger;
pub use usage::{UsageError, UsageTable};
pub use verify::{
    verify_chain, ChainVerification, VerificationFailure, VerificationFailureKind,
    VerificationReport,
};
