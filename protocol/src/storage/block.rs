//! # Block Structure
//!
//! A block wraps one RNA template at one chain position, linked to the
//! previous block by hash, and carries the CIP attestations that made it
//! final.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  block_id: u64             chain position       │
//! │  timestamp: u64            unix ms              │
//! │  previous_block_hash       ZERO for block 0     │
//! │  rna_template: RnaTemplate                      │
//! │  block_hash                QuadritHash of above │
//! ├─────────────────────────────────────────────────┤
//! │  cip: Vec<CipAttestation>  sorted by validator  │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block hash covers `block_id || timestamp || previous_block_hash ||
//! template`. The attestation set is NOT included: attestations sign the
//! hash, so the hash cannot depend on them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BLOCK_DOMAIN_TAG;
use crate::consensus::attestation::CipAttestation;
use crate::crypto::hash::{hash_bytes, QuadritDigest};
use crate::template::{RnaTemplate, TemplateError, TransactionResolver};
use crate::transaction::types::{put_bytes, put_digest, put_u64};

// ---------------------------------------------------------------------------
// ChainTip
// ---------------------------------------------------------------------------

/// Where the next block must attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Position the next block must claim.
    pub next_block_id: u64,
    /// Hash the next block must name as its predecessor.
    pub tip_hash: QuadritDigest,
}

impl ChainTip {
    /// The tip of an empty chain.
    pub const GENESIS: ChainTip = ChainTip {
        next_block_id: 0,
        tip_hash: QuadritDigest::ZERO,
    };

    /// The tip after `block` is appended.
    pub fn after(block: &Block) -> ChainTip {
        ChainTip {
            next_block_id: block.block_id + 1,
            tip_hash: block.block_hash,
        }
    }

    /// Number of finalized blocks below this tip.
    pub fn height(&self) -> u64 {
        self.next_block_id
    }

    pub fn is_genesis(&self) -> bool {
        self.next_block_id == 0
    }
}

impl Default for ChainTip {
    fn default() -> Self {
        Self::GENESIS
    }
}

impl fmt::Display for ChainTip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} after {}", self.next_block_id, self.tip_hash.short())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a block is not structurally valid against a tip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("block claims position {actual}, tip expects {expected}")]
    PositionMismatch { expected: u64, actual: u64 },

    #[error("block extends {actual}, tip is {expected}")]
    PreviousHashMismatch {
        expected: QuadritDigest,
        actual: QuadritDigest,
    },

    #[error("block hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: QuadritDigest,
        actual: QuadritDigest,
    },

    #[error("attestation by {validator} targets {target}, not this block")]
    ForeignAttestation {
        validator: QuadritDigest,
        target: QuadritDigest,
    },

    #[error("attestations are not sorted by validator or contain duplicates")]
    UnorderedAttestations,

    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A candidate or finalized block.
///
/// Fields are read-only. The attestation set only changes through the
/// finality engine, which hands back a new block when it finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    block_id: u64,
    /// Unix timestamp in milliseconds.
    timestamp: u64,
    rna_template: RnaTemplate,
    #[serde(default)]
    cip: Vec<CipAttestation>,
    previous_block_hash: QuadritDigest,
    block_hash: QuadritDigest,
}

impl Block {
    /// Creates a candidate block with no attestations and computes its hash.
    pub fn new(
        block_id: u64,
        timestamp: u64,
        previous_block_hash: QuadritDigest,
        rna_template: RnaTemplate,
    ) -> Self {
        let mut block = Self {
            block_id,
            timestamp,
            rna_template,
            cip: Vec::new(),
            previous_block_hash,
            block_hash: QuadritDigest::ZERO,
        };
        block.block_hash = block.compute_hash();
        block
    }

    /// A candidate that extends `tip`, stamped with the template's creation
    /// time. One template on one tip always yields the same block hash.
    pub fn on_tip(tip: &ChainTip, rna_template: RnaTemplate) -> Self {
        let timestamp = rna_template.created_at();
        Self::new(tip.next_block_id, timestamp, tip.tip_hash, rna_template)
    }

    pub fn block_id(&self) -> u64 {
        self.block_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn rna_template(&self) -> &RnaTemplate {
        &self.rna_template
    }

    /// The attestations that finalized this block. Empty on candidates.
    pub fn cip(&self) -> &[CipAttestation] {
        &self.cip
    }

    pub fn previous_block_hash(&self) -> QuadritDigest {
        self.previous_block_hash
    }

    pub fn block_hash(&self) -> QuadritDigest {
        self.block_hash
    }

    /// Transaction hashes referenced through the template, in order.
    pub fn transaction_hashes(&self) -> &[QuadritDigest] {
        self.rna_template.transactions()
    }

    pub fn is_genesis(&self) -> bool {
        self.block_id == 0
    }

    /// `BLOCK_DOMAIN_TAG | block_id | timestamp | previous | len | template`
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let template = self.rna_template.canonical_bytes();
        let mut buf = Vec::with_capacity(64 + template.len());
        buf.extend_from_slice(BLOCK_DOMAIN_TAG);
        put_u64(&mut buf, self.block_id);
        put_u64(&mut buf, self.timestamp);
        put_digest(&mut buf, &self.previous_block_hash);
        put_bytes(&mut buf, &template);
        buf
    }

    pub fn compute_hash(&self) -> QuadritDigest {
        hash_bytes(&self.canonical_bytes())
    }

    /// Same block, with `attestations` as its CIP set, sorted by validator.
    /// The block hash is unchanged.
    pub(crate) fn with_attestations(mut self, mut attestations: Vec<CipAttestation>) -> Self {
        attestations.sort_by(|a, b| a.validator.cmp(&b.validator));
        attestations.dedup_by(|a, b| a.validator == b.validator);
        self.cip = attestations;
        self
    }

    /// Same block with the attestation set cleared.
    pub(crate) fn without_attestations(mut self) -> Self {
        self.cip.clear();
        self
    }

    /// Structural validity against `tip`:
    ///
    /// 1. `block_id` is the tip's next position.
    /// 2. `previous_block_hash` is the tip hash (ZERO for block 0).
    /// 3. The template is well formed against `resolver`.
    /// 4. `block_hash` matches the recomputed hash.
    /// 5. Every attestation present targets this block, sorted by validator
    ///    with no repeats.
    ///
    /// Seals are not checked here: that needs the validator set.
    pub fn validate_structure<R: TransactionResolver + ?Sized>(
        &self,
        tip: &ChainTip,
        resolver: &R,
    ) -> Result<(), BlockError> {
        if self.block_id != tip.next_block_id {
            return Err(BlockError::PositionMismatch {
                expected: tip.next_block_id,
                actual: self.block_id,
            });
        }

        if self.previous_block_hash != tip.tip_hash {
            return Err(BlockError::PreviousHashMismatch {
                expected: tip.tip_hash,
                actual: self.previous_block_hash,
            });
        }

        self.rna_template.validate(resolver)?;

        let expected = self.compute_hash();
        if expected != self.block_hash {
            return Err(BlockError::HashMismatch {
                expected,
                actual: self.block_hash,
            });
        }

        for att in &self.cip {
            if att.block_hash != self.block_hash {
                return Err(BlockError::ForeignAttestation {
                    validator: att.validator,
                    target: att.block_hash,
                });
            }
        }
        if self.cip.windows(2).any(|w| w[0].validator >= w[1].validator) {
            return Err(BlockError::UnorderedAttestations);
        }

        Ok(())
    }

    /// `validate_structure(tip, resolver).is_ok()`.
    pub fn is_structurally_valid<R: TransactionResolver + ?Sized>(
        &self,
        tip: &ChainTip,
        resolver: &R,
    ) -> bool {
        self.validate_structure(tip, resolver).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
