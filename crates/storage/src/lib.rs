//! Persistent storage layer for the tally usage ledger.
//!
//! This crate provides the collaborators the ledger delegates I/O to:
//! - Chain persistence (load / save the ordered block sequence)
//! - Key storage (signing identities and the authorized key registry)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Ledger                             │
//! │          (admission control, verification)               │
//! └────────────────────────┬────────────────────────────────┘
//!                          │ ChainPersistence
//! ┌────────────────────────▼────────────────────────────────┐
//! │                   Storage Layer                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐  │
//! │  │ JsonChainFile│  │SledChainStore│  │MemoryChainStore│ │
//! │  │  - one file  │  │  - per block │  │  - tests      │  │
//! │  │  - flock     │  │  - txn       │  │               │  │
//! │  └──────────────┘  └──────────────┘  └───────────────┘  │
//! │  ┌──────────────────────────────────────────────────┐   │
//! │  │ KeyStore: identities/*.pem, authorized/*.pem      │   │
//! │  └──────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tally_storage::{ChainPersistence, JsonChainFile, KeyStore};
//!
//! let store = JsonChainFile::new("./data/chain.json");
//! let blocks = store.load_chain().unwrap();
//!
//! let keys = KeyStore::new("./data/keys");
//! let authorized = keys.load_authorized().unwrap();
//! println!("{} blocks, {} authorized keys", blocks.len(), authorized.len());
//! ```

pub mod chain;
pub mod db;
pub mod keys;

// Re-export commonly used types
pub use chain::{ChainPersistence, JsonChainFile, MemoryChainStore, SledChainStore};
pub use db::{Result, Storage, StorageError};
pub use keys::KeyStore;
