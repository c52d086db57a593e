//! # CIP Consensus
//!
//! Finality by attestation quorum. Validators review a candidate block, seal
//! its hash with their Neo Seal key, and submit the resulting
//! [`CipAttestation`]. The [`FinalityEngine`] counts attestation weight per
//! candidate and finalizes the first candidate at each position whose weight
//! strictly exceeds the quorum fraction.
//!
//! ```text
//! attestation.rs  CipAttestation: block hash + validator id + seal
//! validators.rs   ValidatorSet (weights) and QuorumThreshold
//! validator.rs    Validator actor: review, then attest
//! engine.rs       FinalityEngine: candidates, quorum, finalization
//! ```
//!
//! There is no leader election and no rounds. Anyone may propose; the
//! chain tip decides which candidate for a position wins.

pub mod attestation;
pub mod engine;
pub mod validator;
pub mod validators;

pub use attestation::CipAttestation;
pub use engine::{
    AttestationOutcome, CandidateHandle, CandidateSnapshot, CandidateStatus, CipError,
    FinalityConfig, FinalityEngine, RejectReason,
};
pub use validator::{Validator, ValidatorError};
pub use validators::{InvalidThreshold, QuorumThreshold, ValidatorEntry, ValidatorSet, ValidatorSummary};
