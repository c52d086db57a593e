//! CIP attestations: one validator's Neo Seal over one candidate block hash.

use serde::{Deserialize, Serialize};

use crate::crypto::hash::QuadritDigest;
use crate::crypto::mq::{KeyPair, PublicSystem};
use crate::crypto::seal::{self, NeoSeal, SealError};

/// A validator's signed vote that a candidate block is valid.
///
/// The seal covers the block hash and nothing else. The block hash in turn
/// commits to the block position, the previous block, and the whole RNA
/// template, so an attestation cannot be replayed onto another block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipAttestation {
    /// Hash of the candidate block being attested.
    pub block_hash: QuadritDigest,
    /// Fingerprint of the attesting validator's public system.
    pub validator: QuadritDigest,
    /// Neo Seal over `block_hash`.
    pub seal: NeoSeal,
}

impl CipAttestation {
    /// Seals `block_hash` with `keypair`.
    pub fn sign(keypair: &KeyPair, block_hash: QuadritDigest) -> Result<Self, SealError> {
        let seal = seal::sign(keypair, &block_hash)?;
        Ok(Self {
            block_hash,
            validator: keypair.fingerprint(),
            seal,
        })
    }

    /// The seal's own claims agree with the attestation's fields. Cheap;
    /// does not touch the public system.
    pub fn is_bound(&self) -> bool {
        self.seal.signer == self.validator && self.seal.message_hash == self.block_hash
    }

    /// Full check against the validator's registered public system.
    pub fn verify(&self, public_system: &PublicSystem) -> bool {
        self.is_bound()
            && public_system.fingerprint() == self.validator
            && seal::verify(public_system, &self.block_hash, &self.seal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::hash_bytes;
    use crate::crypto::mq::derive_keypair;
    use std::sync::OnceLock;

    fn keys() -> &'static (KeyPair, KeyPair) {
        static KEYS: OnceLock<(KeyPair, KeyPair)> = OnceLock::new();
        KEYS.get_or_init(|| (derive_keypair(b"attest-a"), derive_keypair(b"attest-b")))
    }

    #[test]
    fn signed_attestation_verifies() {
        let (a, _) = keys();
        let att = CipAttestation::sign(a, hash_bytes(b"block")).unwrap();
        assert!(att.is_bound());
        assert!(att.verify(a.public_system()));
    }

    #[test]
    fn wrong_public_system_fails() {
        let (a, b) = keys();
        let att = CipAttestation::sign(a, hash_bytes(b"block")).unwrap();
        assert!(!att.verify(b.public_system()));
    }

    #[test]
    fn retargeted_attestation_fails() {
        let (a, _) = keys();
        let mut att = CipAttestation::sign(a, hash_bytes(b"block")).unwrap();
        att.block_hash = hash_bytes(b"other block");
        assert!(!att.is_bound());
        assert!(!att.verify(a.public_system()));
    }

    #[test]
    fn relabelled_validator_fails() {
        let (a, b) = keys();
        let mut att = CipAttestation::sign(a, hash_bytes(b"block")).unwrap();
        att.validator = b.fingerprint();
        assert!(!att.verify(b.public_system()));
        assert!(!att.verify(a.public_system()));
    }
}
