//! # CIP Finality Engine
//!
//! Collects validator attestations over candidate blocks and finalizes a
//! candidate once the attested weight strictly exceeds the quorum fraction of
//! its validator set.
//!
//! ## Candidate State Machine
//!
//! ```text
//!   Proposed ──validated──► Attesting ──quorum──► Final
//!      │                       │
//!      └──invalid (dropped)    └──timeout / reject / tip moved──► Rejected
//! ```
//!
//! `Final` and `Rejected` are terminal. A proposed block that fails
//! structural validation is dropped outright and never becomes a candidate.
//!
//! ## Locking
//!
//! Every candidate sits behind its own `parking_lot::Mutex` inside a
//! `DashMap`. The chain tip lives behind a single `Mutex<Chain>`. When a
//! candidate reaches quorum the engine takes the chain lock *while holding
//! the candidate lock*, checks that the candidate still extends the tip,
//! persists it, and advances the tip. The order is always candidate, then
//! chain. Nothing takes a candidate lock while holding the chain lock, and no
//! code holds two candidate locks at once.
//!
//! Seal verification is the expensive step, so `submit_attestation` runs it
//! between two short critical sections rather than inside one: look up the
//! validator's public system, unlock, verify, lock again and re-check.
//!
//! ## Validator Sets
//!
//! Each candidate snapshots the engine's validator set when it is proposed.
//! [`FinalityEngine::update_validator_set`] only affects later candidates.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::attestation::CipAttestation;
use super::validators::{QuorumThreshold, ValidatorSet};
use crate::config::DEFAULT_CANDIDATE_TIMEOUT;
use crate::crypto::hash::QuadritDigest;
use crate::storage::{Block, BlockError, BlockStore, Chain, ChainTip, IntegrityError, StorageError};
use crate::transaction::{Transaction, TransactionError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for the finality engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalityConfig {
    /// Fraction of validator weight that must be strictly exceeded.
    pub threshold: QuorumThreshold,

    /// How long a candidate may collect attestations before it is rejected,
    /// in milliseconds.
    pub candidate_timeout_ms: u64,
}

impl FinalityConfig {
    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            threshold: QuorumThreshold::default(),
            candidate_timeout_ms: DEFAULT_CANDIDATE_TIMEOUT.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Status & outcomes
// ---------------------------------------------------------------------------

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum RejectReason {
    /// The attestation window closed before quorum.
    Timeout,
    /// Another block was finalized at this position first.
    TipMoved,
    /// Rejected by an operator or the proposer.
    Explicit(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "attestation window expired"),
            Self::TipMoved => write!(f, "chain tip moved past this position"),
            Self::Explicit(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Lifecycle state of a candidate block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum CandidateStatus {
    /// Claimed by a proposal that is still being validated.
    Proposed,
    /// Open for attestations.
    Attesting,
    /// Reached quorum and persisted.
    Final,
    /// Will never finalize.
    Rejected(RejectReason),
}

impl CandidateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final | Self::Rejected(_))
    }
}

/// What happened to an accepted attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttestationOutcome {
    /// Counted; quorum not reached yet.
    Accepted { attested_weight: u64, total_weight: u64 },
    /// This exact attestation was already counted. Nothing changed.
    Duplicate,
    /// Counted, and it completed the quorum. The block is final.
    Finalized { block_id: u64 },
}

/// Returned by [`FinalityEngine::propose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateHandle {
    pub block_hash: QuadritDigest,
    pub block_id: u64,
    pub template_id: QuadritDigest,
    pub transactions: usize,
}

/// Point-in-time view of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub block_hash: QuadritDigest,
    pub block_id: u64,
    pub template_id: QuadritDigest,
    pub status: CandidateStatus,
    pub attested_weight: u64,
    pub total_weight: u64,
    pub required_weight: u64,
    pub attesters: Vec<QuadritDigest>,
    pub transactions: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons the engine refuses a proposal or an attestation.
#[derive(Debug, Error)]
pub enum CipError {
    #[error("no validators are registered")]
    NoValidators,

    #[error("candidate {0} is already proposed")]
    DuplicateCandidate(QuadritDigest),

    #[error("unknown candidate {0}")]
    UnknownCandidate(QuadritDigest),

    #[error("candidate {0} is still being validated")]
    NotYetOpen(QuadritDigest),

    #[error("{0} is not a validator for this candidate")]
    NotAValidator(QuadritDigest),

    #[error("seal from {validator} does not verify for {block_hash}")]
    InvalidSeal {
        validator: QuadritDigest,
        block_hash: QuadritDigest,
    },

    #[error("validator {0} already attested with different content")]
    ConflictingAttestation(QuadritDigest),

    #[error("block {0} is already final")]
    AlreadyFinal(QuadritDigest),

    #[error("candidate {block_hash} was rejected: {reason}")]
    CandidateRejected {
        block_hash: QuadritDigest,
        reason: RejectReason,
    },

    #[error("candidate for position {candidate} no longer extends the tip ({tip})")]
    ChainTipMismatch { candidate: u64, tip: ChainTip },

    #[error("transaction {0} is already in a final block")]
    TransactionAlreadyFinal(QuadritDigest),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(#[from] TransactionError),

    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

struct Candidate {
    block: Block,
    /// The template's transactions, in template order.
    transactions: Vec<Transaction>,
    validators: Arc<ValidatorSet>,
    attestations: BTreeMap<QuadritDigest, CipAttestation>,
    attested_weight: u64,
    status: CandidateStatus,
    deadline: Instant,
    /// Set once a rejection has been handed to a caller, who then owns
    /// returning the transactions to the pool.
    released: bool,
}

impl Candidate {
    /// Errors unless the candidate accepts attestations. Expires it first if
    /// its window has closed.
    fn ensure_open(&mut self, now: Instant) -> Result<(), CipError> {
        let hash = self.block.block_hash();
        if self.status == CandidateStatus::Attesting && now >= self.deadline {
            self.status = CandidateStatus::Rejected(RejectReason::Timeout);
            info!(hash = %hash.short(), "candidate timed out");
        }
        match &self.status {
            CandidateStatus::Attesting => Ok(()),
            CandidateStatus::Proposed => Err(CipError::NotYetOpen(hash)),
            CandidateStatus::Final => Err(CipError::AlreadyFinal(hash)),
            CandidateStatus::Rejected(reason) => Err(CipError::CandidateRejected {
                block_hash: hash,
                reason: reason.clone(),
            }),
        }
    }

    /// `Some` if this validator already attested: `Duplicate` when the
    /// content matches, an error when it does not.
    fn prior(&self, att: &CipAttestation) -> Option<Result<AttestationOutcome, CipError>> {
        self.attestations.get(&att.validator).map(|existing| {
            if existing == att {
                Ok(AttestationOutcome::Duplicate)
            } else {
                Err(CipError::ConflictingAttestation(att.validator))
            }
        })
    }

    /// Rejected and not yet handed back.
    fn awaiting_release(&self) -> bool {
        matches!(self.status, CandidateStatus::Rejected(_)) && !self.released
    }

    fn snapshot(&self, threshold: &QuorumThreshold) -> CandidateSnapshot {
        let total = self.validators.total_weight();
        CandidateSnapshot {
            block_hash: self.block.block_hash(),
            block_id: self.block.block_id(),
            template_id: self.block.rna_template().template_id(),
            status: self.status.clone(),
            attested_weight: self.attested_weight,
            total_weight: total,
            required_weight: threshold.required_weight(total),
            attesters: self.attestations.keys().copied().collect(),
            transactions: self.transactions.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// FinalityEngine
// ---------------------------------------------------------------------------

/// Drives candidate blocks from proposal to finality.
pub struct FinalityEngine {
    config: FinalityConfig,
    candidates: DashMap<QuadritDigest, Arc<Mutex<Candidate>>>,
    chain: Mutex<Chain>,
    store: Arc<dyn BlockStore>,
    validators: RwLock<Arc<ValidatorSet>>,
}

impl fmt::Debug for FinalityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalityEngine")
            .field("config", &self.config)
            .field("candidates", &self.candidates.len())
            .field("validators", &self.validators.read().len())
            .finish()
    }
}

impl FinalityEngine {
    /// Opens the chain in `store` and starts with `validators`.
    pub fn new(
        config: FinalityConfig,
        validators: ValidatorSet,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self, CipError> {
        let chain = Chain::open(Arc::clone(&store))?;
        info!(
            validators = validators.len(),
            total_weight = validators.total_weight(),
            threshold = %config.threshold,
            tip = %chain.tip(),
            "finality engine initialized"
        );
        Ok(Self {
            config,
            candidates: DashMap::new(),
            chain: Mutex::new(chain),
            store,
            validators: RwLock::new(Arc::new(validators)),
        })
    }

    pub fn config(&self) -> &FinalityConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    // -- Proposal -----------------------------------------------------------

    /// Opens `block` for attestation.
    ///
    /// `transactions` must contain every transaction the block's template
    /// references; extras are ignored. The block is checked against the
    /// current tip under the chain lock, and any attestations it carries are
    /// dropped: a candidate always starts with an empty set.
    pub fn propose(
        &self,
        block: Block,
        transactions: Vec<Transaction>,
    ) -> Result<CandidateHandle, CipError> {
        let block = block.without_attestations();
        let hash = block.block_hash();

        let validators = Arc::clone(&*self.validators.read());
        if validators.is_empty() {
            return Err(CipError::NoValidators);
        }
        if self.store.contains_block(&hash)? {
            return Err(CipError::AlreadyFinal(hash));
        }

        let mut supplied: HashMap<QuadritDigest, Transaction> = HashMap::with_capacity(transactions.len());
        for tx in transactions {
            tx.validate()?;
            supplied.insert(tx.hash(), tx);
        }

        let cell = Arc::new(Mutex::new(Candidate {
            block: block.clone(),
            transactions: Vec::new(),
            validators,
            attestations: BTreeMap::new(),
            attested_weight: 0,
            status: CandidateStatus::Proposed,
            deadline: Instant::now(),
            released: false,
        }));
        match self.candidates.entry(hash) {
            Entry::Occupied(_) => return Err(CipError::DuplicateCandidate(hash)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cell));
            }
        }

        if let Err(e) = self.check_proposal(&block, &supplied) {
            self.candidates.remove(&hash);
            debug!(hash = %hash.short(), error = %e, "proposal refused");
            return Err(e);
        }

        let ordered: Vec<Transaction> = block
            .transaction_hashes()
            .iter()
            .filter_map(|h| supplied.remove(h))
            .collect();
        let handle = CandidateHandle {
            block_hash: hash,
            block_id: block.block_id(),
            template_id: block.rna_template().template_id(),
            transactions: ordered.len(),
        };

        {
            let mut cand = cell.lock();
            cand.transactions = ordered;
            cand.status = CandidateStatus::Attesting;
            cand.deadline = Instant::now() + self.config.candidate_timeout();
        }

        info!(
            hash = %hash.short(),
            block_id = handle.block_id,
            txs = handle.transactions,
            "candidate open for attestation"
        );
        Ok(handle)
    }

    fn check_proposal(
        &self,
        block: &Block,
        supplied: &HashMap<QuadritDigest, Transaction>,
    ) -> Result<(), CipError> {
        {
            let chain = self.chain.lock();
            block.validate_structure(&chain.tip(), supplied)?;
        }
        for hash in block.transaction_hashes() {
            if self.store.contains_transaction(hash)? {
                return Err(CipError::TransactionAlreadyFinal(*hash));
            }
        }
        Ok(())
    }

    // -- Attestation --------------------------------------------------------

    /// Counts one validator's attestation and finalizes on quorum.
    ///
    /// Accepted only if the candidate is open, the validator is in the
    /// candidate's validator set, the seal verifies against that
    /// validator's public system and the block hash, and the validator has
    /// not attested before. Resubmitting the same attestation is a no-op.
    pub fn submit_attestation(&self, att: CipAttestation) -> Result<AttestationOutcome, CipError> {
        let hash = att.block_hash;
        if !att.is_bound() {
            return Err(CipError::InvalidSeal {
                validator: att.validator,
                block_hash: hash,
            });
        }

        let cell = match self.candidates.get(&hash) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                if self.store.contains_block(&hash)? {
                    return Err(CipError::AlreadyFinal(hash));
                }
                return Err(CipError::UnknownCandidate(hash));
            }
        };

        let public_system = {
            let mut cand = cell.lock();
            cand.ensure_open(Instant::now())?;
            let entry = cand
                .validators
                .get(&att.validator)
                .ok_or(CipError::NotAValidator(att.validator))?;
            let public_system = Arc::clone(&entry.public_system);
            if let Some(prior) = cand.prior(&att) {
                return prior;
            }
            public_system
        };

        if !att.verify(&public_system) {
            warn!(
                hash = %hash.short(),
                validator = %att.validator.short(),
                "attestation seal failed verification"
            );
            return Err(CipError::InvalidSeal {
                validator: att.validator,
                block_hash: hash,
            });
        }

        let mut cand = cell.lock();
        cand.ensure_open(Instant::now())?;
        if let Some(prior) = cand.prior(&att) {
            return prior;
        }

        let validator = att.validator;
        let weight = cand.validators.weight_of(&validator);
        cand.attestations.insert(validator, att);
        cand.attested_weight = cand.attested_weight.saturating_add(weight);
        let total = cand.validators.total_weight();

        debug!(
            hash = %hash.short(),
            validator = %validator.short(),
            attested = cand.attested_weight,
            total,
            "attestation accepted"
        );

        if !self.config.threshold.is_met(cand.attested_weight, total) {
            return Ok(AttestationOutcome::Accepted {
                attested_weight: cand.attested_weight,
                total_weight: total,
            });
        }

        self.finalize(&mut cand)
    }

    /// Called with the candidate lock held. Takes the chain lock.
    fn finalize(&self, cand: &mut Candidate) -> Result<AttestationOutcome, CipError> {
        let hash = cand.block.block_hash();
        let block_id = cand.block.block_id();

        let mut chain = self.chain.lock();
        let tip = chain.tip();
        if block_id != tip.next_block_id || cand.block.previous_block_hash() != tip.tip_hash {
            cand.status = CandidateStatus::Rejected(RejectReason::TipMoved);
            warn!(hash = %hash.short(), block_id, tip = %tip, "quorum reached on a stale candidate");
            return Err(CipError::ChainTipMismatch {
                candidate: block_id,
                tip,
            });
        }

        let attestations: Vec<CipAttestation> = cand.attestations.values().cloned().collect();
        let final_block = cand.block.clone().with_attestations(attestations);
        if let Err(e) = chain.append(&final_block, &cand.transactions) {
            warn!(hash = %hash.short(), error = %e, "persisting final block failed; candidate stays open");
            return Err(e.into());
        }

        cand.block = final_block;
        cand.status = CandidateStatus::Final;
        info!(
            hash = %hash.short(),
            block_id,
            weight = cand.attested_weight,
            "block final"
        );
        Ok(AttestationOutcome::Finalized { block_id })
    }

    // -- Rejection & housekeeping -------------------------------------------

    /// Rejects an open candidate. Rejecting an already rejected candidate is
    /// a no-op.
    pub fn reject(&self, hash: &QuadritDigest, reason: impl Into<String>) -> Result<(), CipError> {
        let cell = self
            .candidates
            .get(hash)
            .map(|e| Arc::clone(e.value()))
            .ok_or(CipError::UnknownCandidate(*hash))?;
        let mut cand = cell.lock();
        match cand.status {
            CandidateStatus::Final => Err(CipError::AlreadyFinal(*hash)),
            CandidateStatus::Rejected(_) => Ok(()),
            CandidateStatus::Proposed | CandidateStatus::Attesting => {
                let reason = RejectReason::Explicit(reason.into());
                info!(hash = %hash.short(), reason = %reason, "candidate rejected");
                cand.status = CandidateStatus::Rejected(reason);
                Ok(())
            }
        }
    }

    /// Rejects every open candidate whose window has closed or whose
    /// position is already taken, and hands back every earlier rejection
    /// no caller has claimed yet (late attestations expire candidates
    /// lazily). Each rejection is reported once. Returns what was rejected
    /// and why.
    pub fn expire_stale(&self) -> Vec<(QuadritDigest, RejectReason)> {
        self.drain_rejections()
            .into_iter()
            .map(|(hash, reason, _)| (hash, reason))
            .collect()
    }

    /// [`expire_stale`](Self::expire_stale), plus the transaction hashes
    /// each rejected candidate was holding.
    pub(crate) fn drain_rejections(&self) -> Vec<(QuadritDigest, RejectReason, Vec<QuadritDigest>)> {
        let now = Instant::now();
        let cells: Vec<Arc<Mutex<Candidate>>> =
            self.candidates.iter().map(|e| Arc::clone(e.value())).collect();

        let mut rejected = Vec::new();
        for cell in cells {
            let mut cand = cell.lock();
            if cand.status == CandidateStatus::Attesting {
                let reason = if now >= cand.deadline {
                    RejectReason::Timeout
                } else if cand.block.block_id() < self.chain.lock().tip().next_block_id {
                    RejectReason::TipMoved
                } else {
                    continue;
                };
                debug!(hash = %cand.block.block_hash().short(), reason = %reason, "candidate expired");
                cand.status = CandidateStatus::Rejected(reason);
            }
            if !cand.awaiting_release() {
                continue;
            }
            let CandidateStatus::Rejected(reason) = cand.status.clone() else {
                continue;
            };
            cand.released = true;
            rejected.push((
                cand.block.block_hash(),
                reason,
                cand.block.transaction_hashes().to_vec(),
            ));
        }
        rejected
    }

    /// Claims a rejected candidate's transaction hashes for release. `None`
    /// unless the candidate is rejected and nobody has claimed it yet, so
    /// the transactions go back to the pool at most once.
    pub fn take_rejected(&self, hash: &QuadritDigest) -> Option<Vec<QuadritDigest>> {
        let cell = self.candidates.get(hash).map(|e| Arc::clone(e.value()))?;
        let mut cand = cell.lock();
        if !cand.awaiting_release() {
            return None;
        }
        cand.released = true;
        Some(cand.block.transaction_hashes().to_vec())
    }

    /// Forgets every final candidate and every rejected one whose rejection
    /// has been handed back. Final blocks stay queryable through the store.
    /// Returns how many were dropped.
    pub fn prune_settled(&self) -> usize {
        let before = self.candidates.len();
        self.candidates.retain(|_, cell| {
            let cand = cell.lock();
            !cand.status.is_terminal() || cand.awaiting_release()
        });
        before.saturating_sub(self.candidates.len())
    }

    // -- Queries ------------------------------------------------------------

    /// Status of a candidate, or `Final` for a block already in the store
    /// whose candidate has been pruned.
    pub fn status(&self, hash: &QuadritDigest) -> Result<Option<CandidateStatus>, CipError> {
        if let Some(cell) = self.candidates.get(hash).map(|e| Arc::clone(e.value())) {
            return Ok(Some(cell.lock().status.clone()));
        }
        if self.store.contains_block(hash)? {
            return Ok(Some(CandidateStatus::Final));
        }
        Ok(None)
    }

    pub fn snapshot(&self, hash: &QuadritDigest) -> Option<CandidateSnapshot> {
        let cell = self.candidates.get(hash).map(|e| Arc::clone(e.value()))?;
        let cand = cell.lock();
        Some(cand.snapshot(&self.config.threshold))
    }

    /// The candidate block, for validators to review. Carries its CIP set
    /// once final.
    pub fn candidate_block(&self, hash: &QuadritDigest) -> Option<Block> {
        let cell = self.candidates.get(hash).map(|e| Arc::clone(e.value()))?;
        let block = cell.lock().block.clone();
        Some(block)
    }

    /// The transactions a candidate's template references, in order.
    pub fn candidate_transactions(&self, hash: &QuadritDigest) -> Option<Vec<Transaction>> {
        let cell = self.candidates.get(hash).map(|e| Arc::clone(e.value()))?;
        let txs = cell.lock().transactions.clone();
        Some(txs)
    }

    /// Hashes of candidates currently open for attestation.
    pub fn open_candidates(&self) -> Vec<QuadritDigest> {
        let cells: Vec<(QuadritDigest, Arc<Mutex<Candidate>>)> = self
            .candidates
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        cells
            .into_iter()
            .filter(|(_, cell)| cell.lock().status == CandidateStatus::Attesting)
            .map(|(hash, _)| hash)
            .collect()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn tip(&self) -> ChainTip {
        self.chain.lock().tip()
    }

    pub fn validator_set(&self) -> Arc<ValidatorSet> {
        Arc::clone(&*self.validators.read())
    }

    /// Replaces the validator set for candidates proposed from now on.
    pub fn update_validator_set(&self, validators: ValidatorSet) {
        info!(
            validators = validators.len(),
            total_weight = validators.total_weight(),
            "validator set updated"
        );
        *self.validators.write() = Arc::new(validators);
    }

    /// Re-walks the stored chain. Holds the chain lock, so finalization
    /// waits until the walk is done.
    pub fn verify_chain(&self) -> Result<u64, IntegrityError> {
        self.chain.lock().verify_integrity()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
