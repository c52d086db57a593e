//! # Neo Seal
//!
//! Signing and verification on top of the MQ keys in [`super::mq`].
//!
//! A Neo Seal over a message hash `h` is a vector `x` of n field elements
//! such that `P(x) = target(h, counter)`, where `P` is the signer's public
//! system. The target is:
//!
//! ```text
//!   counter = 0 : the 64 GF(16) elements of h itself
//!   counter > 0 : the 64 GF(16) elements of QuadritHash(tag || h || counter)
//! ```
//!
//! Signing fixes the vinegar variables from the target and solves a 64 x 64
//! linear system for the oil variables. That system is singular about once in
//! sixteen tries; when it is, we bump the counter and try a fresh target. The
//! counter that worked travels in the seal so the verifier can rebuild the
//! same target.
//!
//! Signing is deterministic: same key and same hash, same seal. No RNG is
//! consulted, so there is no nonce to get wrong.
//!
//! ## Verification
//!
//! [`verify`] returns a plain `bool`. It never panics and never tells the
//! caller *why* a seal is bad: wrong signer, wrong hash, wrong length, and
//! wrong solution are all just `false`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use super::gf16::{digest_to_elements, Gf16};
use super::hash::{hash_parts, QuadritDigest};
use super::mq::{KeyPair, PublicSystem, Trapdoor};
use crate::config::{MAX_SIGN_ATTEMPTS, MQ_VARIABLES, SEAL_RETRY_DOMAIN_TAG};

/// Errors raised while producing a seal. Verification has no error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealError {
    #[error("no solution for this target: oil system is singular")]
    NoSolutionFound,

    #[error("no solution found after {0} attempts")]
    AttemptsExhausted(u32),
}

/// A Neo Seal signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeoSeal {
    /// Fingerprint of the signer's public system.
    pub signer: QuadritDigest,
    /// The hash that was signed.
    pub message_hash: QuadritDigest,
    /// Re-randomization counter that produced a solvable target.
    pub counter: u32,
    /// The preimage `x`, n field elements.
    pub solution: Vec<Gf16>,
}

impl NeoSeal {
    /// Solution packed two elements per byte, for compact display.
    pub fn solution_hex(&self) -> String {
        hex::encode(super::gf16::pack(&self.solution))
    }
}

/// The 64-element target a seal for `message_hash` must hit at `counter`.
pub fn signing_target(message_hash: &QuadritDigest, counter: u32) -> Vec<Gf16> {
    if counter == 0 {
        digest_to_elements(message_hash).to_vec()
    } else {
        let rerolled = hash_parts(&[
            SEAL_RETRY_DOMAIN_TAG,
            message_hash.as_bytes(),
            &counter.to_be_bytes(),
        ]);
        digest_to_elements(&rerolled).to_vec()
    }
}

/// Solves `P(x) = target` with the trapdoor.
///
/// Fails with [`SealError::NoSolutionFound`] when the oil system for this
/// target is singular. Callers that need a signature regardless should use
/// [`sign`], which retries with fresh targets.
pub fn sign_target(trapdoor: &Trapdoor, target: &[Gf16]) -> Result<Vec<Gf16>, SealError> {
    trapdoor.invert(target).ok_or(SealError::NoSolutionFound)
}

/// Seals `message_hash` with `keypair`.
///
/// # Example
///
/// ```no_run
/// use helix_protocol::crypto::hash::hash_bytes;
/// use helix_protocol::crypto::mq::derive_keypair;
/// use helix_protocol::crypto::seal::{sign, verify};
///
/// let kp = derive_keypair(b"validator seed");
/// let h = hash_bytes(b"block candidate");
/// let seal = sign(&kp, &h).unwrap();
/// assert!(verify(kp.public_system(), &h, &seal));
/// ```
pub fn sign(keypair: &KeyPair, message_hash: &QuadritDigest) -> Result<NeoSeal, SealError> {
    for counter in 0..MAX_SIGN_ATTEMPTS {
        let target = signing_target(message_hash, counter);
        match sign_target(keypair.trapdoor(), &target) {
            Ok(solution) => {
                return Ok(NeoSeal {
                    signer: keypair.fingerprint(),
                    message_hash: *message_hash,
                    counter,
                    solution,
                });
            }
            Err(SealError::NoSolutionFound) => {
                trace!(counter, hash = %message_hash.short(), "singular oil system, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(SealError::AttemptsExhausted(MAX_SIGN_ATTEMPTS))
}

/// Checks a seal against a public system and the hash it claims to cover.
pub fn verify(public_system: &PublicSystem, message_hash: &QuadritDigest, seal: &NeoSeal) -> bool {
    if seal.signer != public_system.fingerprint() || seal.message_hash != *message_hash {
        return false;
    }
    if seal.solution.len() != MQ_VARIABLES || seal.counter >= MAX_SIGN_ATTEMPTS {
        return false;
    }

    let target = signing_target(message_hash, seal.counter);
    match public_system.evaluate(&seal.solution) {
        Some(values) => values == target,
        None => false,
    }
}
