//! Full-chain re-verification.
//!
//! Walks a block sequence from the start and re-applies every admission check
//! that `Ledger::append` applies, plus the link to the previous block. The
//! walk stops at the first failing block.

use serde::Serialize;
use tally_consensus::{evaluate_quorum, AuthorizedKeys, BlockValidator, ValidationError};
use tally_core::{Block, ZERO_HASH};
use thiserror::Error;

/// What was wrong with the first invalid block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailureKind {
    #[error("malformed block: {0}")]
    Malformed(ValidationError),

    #[error("content does not match the stored hash")]
    HashMismatch,

    #[error("prev_hash does not link to the previous block")]
    BrokenLink,

    #[error("quorum not met ({valid} of {required} required signatures)")]
    QuorumNotMet { valid: usize, required: usize },
}

/// The first block that failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("block {index}: {kind}")]
pub struct VerificationFailure {
    pub index: usize,
    pub kind: VerificationFailureKind,
}

/// Outcome of a full-chain scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// Number of blocks scanned over (the whole chain).
    pub length: usize,
    /// First failure, if any.
    pub first_invalid: Option<VerificationFailure>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.first_invalid.is_none()
    }

    pub fn first_invalid_index(&self) -> Option<usize> {
        self.first_invalid.as_ref().map(|failure| failure.index)
    }

    /// The `(valid, first_invalid_index)` pair.
    pub fn summary(&self) -> (bool, Option<usize>) {
        (self.is_valid(), self.first_invalid_index())
    }

    /// JSON form served to outside callers.
    pub fn report(&self) -> VerificationReport {
        VerificationReport {
            verified: self.is_valid(),
            length: self.length,
            at: self.first_invalid_index(),
            error: self.first_invalid.as_ref().map(|f| f.kind.to_string()),
        }
    }
}

/// Serializable verification result.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Verify `blocks` as a complete chain.
pub fn verify_chain(
    blocks: &[Block],
    authorized: &AuthorizedKeys,
    threshold: usize,
) -> ChainVerification {
    let mut expected_prev = ZERO_HASH;

    for (index, block) in blocks.iter().enumerate() {
        if let Err(kind) = check_block(block, expected_prev, authorized, threshold) {
            return ChainVerification {
                length: blocks.len(),
                first_invalid: Some(VerificationFailure { index, kind }),
            };
        }
        expected_prev = &block.hash;
    }

    ChainVerification {
        length: blocks.len(),
        first_invalid: None,
    }
}

fn check_block(
    block: &Block,
    expected_prev: &str,
    authorized: &AuthorizedKeys,
    threshold: usize,
) -> Result<(), VerificationFailureKind> {
    BlockValidator::validate_structure(block).map_err(VerificationFailureKind::Malformed)?;

    if !block.hash_matches() {
        return Err(VerificationFailureKind::HashMismatch);
    }

    if BlockValidator::validate_extends(block, expected_prev).is_err() {
        return Err(VerificationFailureKind::BrokenLink);
    }

    let outcome = evaluate_quorum(
        &block.hash,
        &block.signatures,
        &block.signer_keys,
        authorized,
        threshold,
    );
    if !outcome.accepted {
        return Err(VerificationFailureKind::QuorumNotMet {
            valid: outcome.valid_count,
            required: outcome.required,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Keypair, UsageUpdate};

    struct Fixture {
        signers: Vec<Keypair>,
        authorized: AuthorizedKeys,
    }

    impl Fixture {
        fn new() -> Self {
            let signers = vec![Keypair::generate(), Keypair::generate()];
            let authorized = AuthorizedKeys::from_keys(signers.iter().map(|kp| &kp.public_key));
            Self {
                signers,
                authorized,
            }
        }

        fn chain(&self, len: u64) -> Vec<Block> {
            let mut blocks: Vec<Block> = Vec::new();
            for i in 0..len {
                let prev = blocks.last().map_or(ZERO_HASH.to_string(), |b| b.hash.clone());
                let update = UsageUpdate::new(format!("can-{}", i % 2), i, i + 5, "admin");
                blocks.push(Block::build(update, prev, &self.signers).unwrap());
            }
            blocks
        }
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let fx = Fixture::new();
        let result = verify_chain(&[], &fx.authorized, 2);
        assert_eq!(result.summary(), (true, None));
        assert_eq!(result.length, 0);
    }

    #[test]
    fn test_valid_chain() {
        let fx = Fixture::new();
        let chain = fx.chain(4);
        assert_eq!(verify_chain(&chain, &fx.authorized, 2).summary(), (true, None));
    }

    #[test]
    fn test_reports_first_invalid_index() {
        let fx = Fixture::new();
        let mut chain = fx.chain(4);
        chain[2].subject_id.push('x');
        chain[3].author.push('x');

        let result = verify_chain(&chain, &fx.authorized, 2);
        assert_eq!(result.summary(), (false, Some(2)));
        assert_eq!(
            result.first_invalid.unwrap().kind,
            VerificationFailureKind::HashMismatch
        );
    }

    #[test]
    fn test_broken_link_detected() {
        let fx = Fixture::new();
        let mut chain = fx.chain(3);
        chain.remove(1);

        let result = verify_chain(&chain, &fx.authorized, 2);
        assert_eq!(result.first_invalid_index(), Some(1));
        assert_eq!(
            result.first_invalid.unwrap().kind,
            VerificationFailureKind::BrokenLink
        );
    }

    #[test]
    fn test_genesis_must_start_at_zero_hash() {
        let fx = Fixture::new();
        let chain = fx.chain(3);

        let result = verify_chain(&chain[1..], &fx.authorized, 2);
        assert_eq!(result.first_invalid_index(), Some(0));
    }

    #[test]
    fn test_quorum_rechecked_against_current_registry() {
        let fx = Fixture::new();
        let chain = fx.chain(2);

        let reduced = AuthorizedKeys::from_keys([&fx.signers[0].public_key]);
        let result = verify_chain(&chain, &reduced, 2);
        assert_eq!(
            result.first_invalid,
            Some(VerificationFailure {
                index: 0,
                kind: VerificationFailureKind::QuorumNotMet {
                    valid: 1,
                    required: 2
                },
            })
        );
    }

    #[test]
    fn test_malformed_block_reported() {
        let fx = Fixture::new();
        let mut chain = fx.chain(2);
        chain[1].signer_keys.pop();

        let result = verify_chain(&chain, &fx.authorized, 2);
        assert_eq!(result.first_invalid_index(), Some(1));
        assert!(matches!(
            result.first_invalid.unwrap().kind,
            VerificationFailureKind::Malformed(ValidationError::SignatureCountMismatch { .. })
        ));
    }

    #[test]
    fn test_report_json() {
        let fx = Fixture::new();
        let mut chain = fx.chain(2);
        chain[0].new_value += 1;

        let report = verify_chain(&chain, &fx.authorized, 2).report();
        let report = serde_json::to_value(report).unwrap();
        assert_eq!(report["verified"], false);
        assert_eq!(report["at"], 0);
        assert_eq!(report["length"], 2);

        let ok = verify_chain(&chain[..0], &fx.authorized, 2).report();
        let ok = serde_json::to_value(ok).unwrap();
        assert!(ok.get("at").is_none());
    }
}
