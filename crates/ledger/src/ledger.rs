//! The append-only ledger.
//!
//! Holds the accepted block sequence in memory, delegates persistence to a
//! [`ChainPersistence`] backend and decides admission of new blocks.

use crate::error::{AppendError, LedgerError, Result};
use crate::usage::UsageTable;
use crate::verify::{verify_chain, ChainVerification};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tally_consensus::{evaluate_quorum, AuthorizedKeys, BlockValidator};
use tally_core::{Block, Keypair, UsageUpdate, ZERO_HASH};
use tally_storage::{ChainPersistence, MemoryChainStore, StorageError};
use tracing::{debug, error, info, warn};

/// An append-only, hash-linked, quorum-signed sequence of usage blocks.
///
/// Readers always see a complete prefix of the chain. Appends are serialized
/// by the write lock, so two candidates built on the same tip cannot both be
/// accepted: the second one fails with [`AppendError::StaleTip`]. The same
/// holds across ledgers sharing one store, because the store refuses a save
/// that does not extend what it holds.
pub struct Ledger {
    blocks: RwLock<Vec<Block>>,
    store: Box<dyn ChainPersistence>,
}

impl Ledger {
    /// Load the persisted chain from `store`.
    ///
    /// The sequence is taken as-is; call [`Ledger::verify_all`] to check it.
    pub fn open(store: impl ChainPersistence + 'static) -> Result<Self> {
        Self::from_boxed(Box::new(store))
    }

    /// Like [`Ledger::open`] for an already boxed backend.
    pub fn from_boxed(store: Box<dyn ChainPersistence>) -> Result<Self> {
        let blocks = store.load_chain()?;
        debug!(length = blocks.len(), "loaded chain");
        Ok(Self {
            blocks: RwLock::new(blocks),
            store,
        })
    }

    /// An empty ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
            store: Box::new(MemoryChainStore::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Snapshot of the whole chain, in order.
    pub fn chain(&self) -> Vec<Block> {
        self.read().clone()
    }

    /// The last accepted block.
    pub fn tip(&self) -> Option<Block> {
        self.read().last().cloned()
    }

    /// Hash of the last accepted block, or [`ZERO_HASH`] for an empty chain.
    pub fn tip_hash(&self) -> String {
        tip_hash_of(&self.read())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Block at `index`, if any.
    pub fn block(&self, index: usize) -> Option<Block> {
        self.read().get(index).cloned()
    }

    /// Latest recorded value per subject.
    pub fn usage(&self) -> UsageTable {
        UsageTable::from_chain(&self.read())
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Admit `candidate` as the new tip.
    ///
    /// Checks run in order and the first failure decides the error:
    /// structure, hash, link to the current tip, quorum. An accepted block is
    /// persisted before it becomes visible; if persisting fails the chain is
    /// left unchanged. If the store was extended by another writer, the
    /// ledger reloads it and the candidate fails as stale. Returns the hash
    /// of the new tip.
    pub fn append(
        &self,
        candidate: Block,
        authorized: &AuthorizedKeys,
        threshold: usize,
    ) -> std::result::Result<String, AppendError> {
        BlockValidator::validate_structure(&candidate).map_err(|e| rejected(e.into()))?;

        let computed = candidate.compute_hash().to_hex();
        if computed != candidate.hash {
            return Err(rejected(AppendError::HashMismatch {
                expected: computed,
                actual: candidate.hash,
            }));
        }

        let mut blocks = self.write();

        let tip = tip_hash_of(&blocks);
        if candidate.prev_hash != tip {
            return Err(rejected(AppendError::StaleTip {
                expected: tip,
                actual: candidate.prev_hash,
            }));
        }

        let outcome = evaluate_quorum(
            &candidate.hash,
            &candidate.signatures,
            &candidate.signer_keys,
            authorized,
            threshold,
        );
        if !outcome.accepted {
            return Err(rejected(AppendError::QuorumNotMet {
                valid: outcome.valid_count,
                required: outcome.required,
            }));
        }

        let hash = candidate.hash.clone();
        let subject = candidate.subject_id.clone();
        let prev_hash = candidate.prev_hash.clone();
        blocks.push(candidate);
        match self.store.save_chain(&blocks) {
            Ok(()) => {}
            Err(StorageError::Conflict { stored_tip, .. }) => {
                blocks.pop();
                self.resync(&mut blocks);
                return Err(rejected(AppendError::StaleTip {
                    expected: stored_tip,
                    actual: prev_hash,
                }));
            }
            Err(e) => {
                blocks.pop();
                error!(error = %e, "failed to persist chain, block dropped");
                return Err(AppendError::Storage(e));
            }
        }

        info!(
            index = blocks.len() - 1,
            hash = %hash,
            subject = %subject,
            signatures = outcome.valid_count,
            "block accepted"
        );
        Ok(hash)
    }

    /// Replace the in-memory chain with what the store holds now.
    fn resync(&self, blocks: &mut Vec<Block>) {
        match self.store.load_chain() {
            Ok(latest) => {
                debug!(from = blocks.len(), to = latest.len(), "reloaded chain written elsewhere");
                *blocks = latest;
            }
            Err(e) => warn!(error = %e, "could not reload chain after a conflicting write"),
        }
    }

    /// Build the next block on the current tip and sign it with `identities`.
    ///
    /// The result is only a candidate: another append may still win the race.
    pub fn build_next<'a, I>(&self, update: UsageUpdate, identities: I) -> Result<Block>
    where
        I: IntoIterator<Item = &'a Keypair>,
    {
        Ok(Block::build(update, self.tip_hash(), identities)?)
    }

    /// Append a block built by `build`, rebuilding on
    /// [`AppendError::StaleTip`] up to `attempts` times.
    ///
    /// Each attempt hands `build` the tip hash and the usage table of the
    /// same chain snapshot, so a rebuilt block reflects the race it lost.
    pub fn append_with_retry<F>(
        &self,
        mut build: F,
        authorized: &AuthorizedKeys,
        threshold: usize,
        attempts: usize,
    ) -> Result<String>
    where
        F: FnMut(&str, &UsageTable) -> Result<Block>,
    {
        for attempt in 1..=attempts {
            let (tip, usage) = {
                let blocks = self.read();
                (tip_hash_of(&blocks), UsageTable::from_chain(&blocks))
            };
            let candidate = build(&tip, &usage)?;
            match self.append(candidate, authorized, threshold) {
                Ok(hash) => return Ok(hash),
                Err(e) if e.is_retryable() => {
                    debug!(attempt, attempts, "tip moved, rebuilding candidate");
                }
                Err(e) => return Err(LedgerError::Append(e)),
            }
        }
        Err(LedgerError::RetriesExhausted { attempts })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Re-check the whole chain against `authorized` and `threshold`.
    ///
    /// Read-only; the result depends only on the chain and the arguments.
    pub fn verify_all(&self, authorized: &AuthorizedKeys, threshold: usize) -> ChainVerification {
        let result = verify_chain(&self.read(), authorized, threshold);
        if let Some(failure) = &result.first_invalid {
            error!(index = failure.index, reason = %failure.kind, "chain verification failed");
        }
        result
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("length", &self.len()).finish()
    }
}

fn tip_hash_of(blocks: &[Block]) -> String {
    blocks
        .last()
        .map_or_else(|| ZERO_HASH.to_string(), |block| block.hash.clone())
}

fn rejected(err: AppendError) -> AppendError {
    warn!(reason = %err, "block rejected");
    err
}
