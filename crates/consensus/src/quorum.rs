//! Threshold signature quorum.
//!
//! A block is accepted when at least `threshold` distinct authorized keys
//! produced a valid signature over its hex hash. Signatures and keys are
//! paired by position; pairs that fail to parse are simply not counted.

use std::collections::HashSet;
use tally_core::{KeyBytes, PublicKey, Signature};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while assembling a key registry.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("authorized key #{index} is not a valid public key: {reason}")]
    InvalidAuthorizedKey { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// The set of public keys trusted to sign blocks.
///
/// Keys are compared by their raw 32 bytes, so two PEM renderings of the
/// same key are the same member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedKeys {
    keys: HashSet<KeyBytes>,
}

impl AuthorizedKeys {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from parsed public keys.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a PublicKey>) -> Self {
        Self {
            keys: keys.into_iter().map(PublicKey::as_bytes).collect(),
        }
    }

    /// Build a registry from PEM documents; any malformed document is an error.
    pub fn from_pems<S: AsRef<str>>(pems: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut registry = Self::new();
        for (index, pem) in pems.into_iter().enumerate() {
            let key = PublicKey::from_pem(pem.as_ref()).map_err(|e| {
                ConsensusError::InvalidAuthorizedKey {
                    index,
                    reason: e.to_string(),
                }
            })?;
            registry.insert(&key);
        }
        Ok(registry)
    }

    /// Add a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: &PublicKey) -> bool {
        self.keys.insert(key.as_bytes())
    }

    /// Check if a key is authorized.
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains(&key.as_bytes())
    }

    /// Get the number of authorized keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Result of a quorum evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumOutcome {
    /// Whether `valid_count >= required`.
    pub accepted: bool,
    /// Distinct authorized keys with a valid signature.
    pub valid_count: usize,
    /// The threshold that was applied.
    pub required: usize,
}

/// Count the distinct authorized keys that validly signed `block_hash`.
///
/// The message checked is the UTF-8 bytes of the hex `block_hash` string.
/// Evaluation always runs to completion.
pub fn evaluate_quorum(
    block_hash: &str,
    signatures: &[String],
    signer_keys: &[String],
    authorized: &AuthorizedKeys,
    threshold: usize,
) -> QuorumOutcome {
    let message = block_hash.as_bytes();
    let mut counted: HashSet<KeyBytes> = HashSet::new();

    for (slot, (signature, key_pem)) in signatures.iter().zip(signer_keys).enumerate() {
        let Ok(key) = PublicKey::from_pem(key_pem) else {
            debug!(slot, "skipping signature: unparseable signer key");
            continue;
        };
        if !authorized.contains(&key) {
            debug!(slot, signer = %key.fingerprint(), "skipping signature: signer not authorized");
            continue;
        }
        if counted.contains(&key.as_bytes()) {
            debug!(slot, signer = %key.fingerprint(), "skipping signature: signer already counted");
            continue;
        }

        let valid = Signature::from_hex(signature)
            .map(|sig| key.verify(message, &sig).is_ok())
            .unwrap_or(false);
        if valid {
            counted.insert(key.as_bytes());
        } else {
            debug!(slot, signer = %key.fingerprint(), "skipping signature: verification failed");
        }
    }

    let valid_count = counted.len();
    QuorumOutcome {
        accepted: valid_count >= threshold,
        valid_count,
        required: threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Keypair;

    const BLOCK_HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn signed_by(kp: &Keypair, message: &str) -> (String, String) {
        (kp.sign(message.as_bytes()).to_hex(), kp.public_key_pem().unwrap())
    }

    fn evaluate(
        pairs: &[(String, String)],
        authorized: &AuthorizedKeys,
        threshold: usize,
    ) -> QuorumOutcome {
        let signatures: Vec<String> = pairs.iter().map(|(s, _)| s.clone()).collect();
        let keys: Vec<String> = pairs.iter().map(|(_, k)| k.clone()).collect();
        evaluate_quorum(BLOCK_HASH, &signatures, &keys, authorized, threshold)
    }

    fn registry(keypairs: &[&Keypair]) -> AuthorizedKeys {
        AuthorizedKeys::from_keys(keypairs.iter().map(|kp| &kp.public_key))
    }

    #[test]
    fn test_two_valid_signatures_accepted() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let pairs = [signed_by(&a, BLOCK_HASH), signed_by(&b, BLOCK_HASH)];

        let outcome = evaluate(&pairs, &registry(&[&a, &b]), 2);
        assert!(outcome.accepted);
        assert_eq!(outcome.valid_count, 2);
        assert_eq!(outcome.required, 2);
    }

    #[test]
    fn test_single_valid_signature_rejected() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let outsider = Keypair::generate();
        let pairs = [
            signed_by(&a, BLOCK_HASH),
            signed_by(&b, "some other message"),
            signed_by(&outsider, BLOCK_HASH),
        ];

        let outcome = evaluate(&pairs, &registry(&[&a, &b]), 2);
        assert!(!outcome.accepted);
        assert_eq!(outcome.valid_count, 1);
    }

    #[test]
    fn test_two_valid_plus_one_invalid_accepted() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let c = Keypair::generate();
        let pairs = [
            signed_by(&a, BLOCK_HASH),
            signed_by(&c, "tampered"),
            signed_by(&b, BLOCK_HASH),
        ];

        let outcome = evaluate(&pairs, &registry(&[&a, &b, &c]), 2);
        assert!(outcome.accepted);
        assert_eq!(outcome.valid_count, 2);
    }

    #[test]
    fn test_duplicate_key_counts_once() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let pairs = [
            signed_by(&a, BLOCK_HASH),
            signed_by(&a, BLOCK_HASH),
            signed_by(&a, BLOCK_HASH),
        ];

        let outcome = evaluate(&pairs, &registry(&[&a, &b]), 2);
        assert!(!outcome.accepted);
        assert_eq!(outcome.valid_count, 1);
    }

    #[test]
    fn test_invalid_then_valid_slot_for_same_key() {
        let a = Keypair::generate();
        let pairs = [signed_by(&a, "wrong"), signed_by(&a, BLOCK_HASH)];

        let outcome = evaluate(&pairs, &registry(&[&a]), 1);
        assert!(outcome.accepted);
        assert_eq!(outcome.valid_count, 1);
    }

    #[test]
    fn test_malformed_material_counts_as_invalid() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let pairs = [
            ("zz-not-hex".to_string(), a.public_key_pem().unwrap()),
            (
                b.sign(BLOCK_HASH.as_bytes()).to_hex(),
                "-----BEGIN PUBLIC KEY-----\ngarbage\n".to_string(),
            ),
            signed_by(&b, BLOCK_HASH),
        ];

        let outcome = evaluate(&pairs, &registry(&[&a, &b]), 2);
        assert!(!outcome.accepted);
        assert_eq!(outcome.valid_count, 1);
    }

    #[test]
    fn test_unpaired_entries_ignored() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let signatures = vec![
            a.sign(BLOCK_HASH.as_bytes()).to_hex(),
            b.sign(BLOCK_HASH.as_bytes()).to_hex(),
        ];
        let keys = vec![a.public_key_pem().unwrap()];

        let outcome = evaluate_quorum(BLOCK_HASH, &signatures, &keys, &registry(&[&a, &b]), 2);
        assert_eq!(outcome.valid_count, 1);
    }

    #[test]
    fn test_empty_registry_accepts_nothing() {
        let a = Keypair::generate();
        let pairs = [signed_by(&a, BLOCK_HASH)];

        let outcome = evaluate(&pairs, &AuthorizedKeys::new(), 1);
        assert!(!outcome.accepted);
        assert_eq!(outcome.valid_count, 0);
    }

    #[test]
    fn test_registry_from_pems() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let pems = [
            a.public_key_pem().unwrap(),
            b.public_key_pem().unwrap(),
            a.public_key_pem().unwrap(),
        ];

        let registry = AuthorizedKeys::from_pems(&pems).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&a.public_key));
        assert!(!registry.contains(&Keypair::generate().public_key));
    }

    #[test]
    fn test_registry_rejects_malformed_pem() {
        let a = Keypair::generate();
        let pems = [a.public_key_pem().unwrap(), "nope".to_string()];

        assert!(matches!(
            AuthorizedKeys::from_pems(&pems),
            Err(ConsensusError::InvalidAuthorizedKey { index: 1, .. })
        ));
    }
}
