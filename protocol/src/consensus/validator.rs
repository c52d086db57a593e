//! A validator: a named key pair that reviews candidates and attests to the
//! ones it accepts.
//!
//! Validators hold no shared state. Run as many as you like on as many
//! threads as you like; they only meet at the finality engine.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::attestation::CipAttestation;
use crate::crypto::hash::QuadritDigest;
use crate::crypto::mq::{derive_keypair, KeyPair, PublicSystem};
use crate::crypto::seal::SealError;
use crate::storage::{Block, BlockError, ChainTip};
use crate::template::TransactionResolver;

/// Why a validator declined to attest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorError {
    #[error("block failed review: {0}")]
    Block(#[from] BlockError),

    #[error("could not seal: {0}")]
    Seal(#[from] SealError),
}

pub struct Validator {
    name: String,
    keypair: KeyPair,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.name)
            .field("id", &self.id().short())
            .finish()
    }
}

impl Validator {
    pub fn new(name: impl Into<String>, keypair: KeyPair) -> Self {
        Self {
            name: name.into(),
            keypair,
        }
    }

    /// Derives the key pair from `seed`. Takes a while: key expansion is the
    /// slow part of the whole system.
    pub fn from_seed(name: impl Into<String>, seed: &[u8]) -> Self {
        Self::new(name, derive_keypair(seed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> QuadritDigest {
        self.keypair.fingerprint()
    }

    pub fn public_system(&self) -> &Arc<PublicSystem> {
        self.keypair.public_system()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Checks `block` against `tip` and seals its hash.
    pub fn attest<R: TransactionResolver + ?Sized>(
        &self,
        block: &Block,
        tip: &ChainTip,
        resolver: &R,
    ) -> Result<CipAttestation, ValidatorError> {
        block.validate_structure(tip, resolver)?;
        let att = CipAttestation::sign(&self.keypair, block.block_hash())?;
        debug!(
            validator = %self.name,
            hash = %block.block_hash().short(),
            counter = att.seal.counter,
            "attested"
        );
        Ok(att)
    }
}
