//! # Ledger
//!
//! The one entry point outside callers need. A [`Ledger`] owns the intake
//! pool and the finality engine (which owns the chain), and keeps the two in
//! step: transactions reserved into a template return to pending if their
//! candidate is rejected, and leave the pool for good once it is final.
//!
//! ```text
//!   submit_transaction ──► pool ──build_template──► RnaTemplate
//!                                                        │
//!                              propose_template ◄────────┘
//!                                     │
//!   submit_attestation ──► engine ──quorum──► store (final)
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::consensus::{
    AttestationOutcome, CandidateHandle, CandidateSnapshot, CandidateStatus, CipAttestation,
    CipError, FinalityConfig, FinalityEngine, RejectReason, ValidatorSet,
};
use crate::crypto::hash::QuadritDigest;
use crate::crypto::mq::{KeyError, PublicSystem};
use crate::crypto::quadrit::MalformedSequenceError;
use crate::crypto::seal::{self, NeoSeal, SealError};
use crate::storage::{Block, BlockError, BlockStore, ChainTip, IntegrityError, MemoryStore, StorageError};
use crate::template::{RnaTemplate, TemplateError};
use crate::transaction::{
    PoolConfig, PoolError, SubmitOutcome, Transaction, TransactionError, TransactionPool,
    TransactionStatus,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every error the core can raise, one variant per module.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    MalformedSequence(#[from] MalformedSequenceError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(#[from] TransactionError),

    #[error(transparent)]
    Pool(PoolError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Cip(#[from] CipError),
}

impl From<PoolError> for LedgerError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Malformed(inner) => LedgerError::MalformedTransaction(inner),
            other => LedgerError::Pool(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    pool: TransactionPool,
    engine: FinalityEngine,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("pool", &self.pool)
            .field("engine", &self.engine)
            .finish()
    }
}

impl Ledger {
    pub fn new(
        store: Arc<dyn BlockStore>,
        validators: ValidatorSet,
        finality: FinalityConfig,
        pool: PoolConfig,
    ) -> LedgerResult<Self> {
        let engine = FinalityEngine::new(finality, validators, store)?;
        Ok(Self {
            pool: TransactionPool::new(pool),
            engine,
        })
    }

    /// A ledger over a fresh [`MemoryStore`] with default configuration.
    pub fn in_memory(validators: ValidatorSet) -> LedgerResult<Self> {
        Self::new(
            Arc::new(MemoryStore::new()),
            validators,
            FinalityConfig::default(),
            PoolConfig::default(),
        )
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn engine(&self) -> &FinalityEngine {
        &self.engine
    }

    // -- Intake -------------------------------------------------------------

    /// Validates and pools a transaction. A transaction already in a final
    /// block is reported as [`SubmitOutcome::AlreadyFinal`] and not pooled.
    pub fn submit_transaction(&self, tx: Transaction) -> LedgerResult<SubmitOutcome> {
        tx.validate()?;
        if self.engine.store().contains_transaction(&tx.hash())? {
            return Ok(SubmitOutcome::AlreadyFinal);
        }
        Ok(self.pool.submit(tx)?)
    }

    /// Reserves up to `max` pending transactions, oldest first, into a new
    /// template. `None` when nothing is pending.
    pub fn build_template(&self, proposer: &str, max: usize) -> Option<RnaTemplate> {
        let txs = self.pool.reserve_pending(max);
        if txs.is_empty() {
            return None;
        }
        let template = RnaTemplate::from_transactions(proposer, &txs);
        debug!(
            template = %template.template_id().short(),
            txs = template.len(),
            "template built"
        );
        Some(template)
    }

    // -- Consensus ----------------------------------------------------------

    /// Wraps `template` in a candidate block on the current tip and opens it
    /// for attestation. When no candidate could be opened the template's
    /// transactions go back to pending. A duplicate of a live or final
    /// candidate leaves them with that candidate.
    pub fn propose_template(&self, template: RnaTemplate) -> LedgerResult<CandidateHandle> {
        let result = self.open_candidate(&template);
        match &result {
            Err(LedgerError::Cip(CipError::DuplicateCandidate(_) | CipError::AlreadyFinal(_))) => {}
            Err(_) => self.pool.release(template.transactions()),
            Ok(_) => {}
        }
        result
    }

    fn open_candidate(&self, template: &RnaTemplate) -> LedgerResult<CandidateHandle> {
        template.validate(&self.pool)?;
        let txs = template.resolve_all(&self.pool).ok_or_else(|| {
            let missing = template
                .transactions()
                .iter()
                .find(|h| !self.pool.contains(h))
                .copied()
                .unwrap_or(QuadritDigest::ZERO);
            TemplateError::DanglingReference(missing)
        })?;
        let block = Block::on_tip(&self.engine.tip(), template.clone());
        Ok(self.engine.propose(block, txs)?)
    }

    /// Hands an attestation to the engine. A finalization prunes the pool;
    /// a rejection (tip mismatch, or a late attestation finding the window
    /// closed) releases the candidate's transactions.
    pub fn submit_attestation(&self, att: CipAttestation) -> LedgerResult<AttestationOutcome> {
        let hash = att.block_hash;
        match self.engine.submit_attestation(att) {
            Ok(AttestationOutcome::Finalized { block_id }) => {
                if let Some(block) = self.engine.candidate_block(&hash) {
                    self.pool.remove_batch(block.transaction_hashes());
                }
                Ok(AttestationOutcome::Finalized { block_id })
            }
            Ok(outcome) => Ok(outcome),
            Err(e @ (CipError::ChainTipMismatch { .. } | CipError::CandidateRejected { .. })) => {
                self.release_candidate(&hash);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rejects an open candidate and releases its transactions.
    pub fn reject_candidate(&self, hash: &QuadritDigest, reason: &str) -> LedgerResult<()> {
        self.engine.reject(hash, reason)?;
        self.release_candidate(hash);
        Ok(())
    }

    /// Rejects expired or superseded candidates and releases the
    /// transactions of every rejection not released yet.
    pub fn expire_stale(&self) -> Vec<(QuadritDigest, RejectReason)> {
        self.engine
            .drain_rejections()
            .into_iter()
            .map(|(hash, reason, txs)| {
                info!(hash = %hash.short(), reason = %reason, "releasing rejected candidate");
                self.pool.release(&txs);
                (hash, reason)
            })
            .collect()
    }

    pub fn prune_settled(&self) -> usize {
        self.engine.prune_settled()
    }

    fn release_candidate(&self, hash: &QuadritDigest) {
        if let Some(txs) = self.engine.take_rejected(hash) {
            self.pool.release(&txs);
        }
    }

    // -- Queries ------------------------------------------------------------

    pub fn candidate_block(&self, hash: &QuadritDigest) -> Option<Block> {
        self.engine.candidate_block(hash)
    }

    pub fn candidate_snapshot(&self, hash: &QuadritDigest) -> Option<CandidateSnapshot> {
        self.engine.snapshot(hash)
    }

    pub fn candidate_status(&self, hash: &QuadritDigest) -> LedgerResult<Option<CandidateStatus>> {
        Ok(self.engine.status(hash)?)
    }

    pub fn get_block(&self, block_id: u64) -> LedgerResult<Option<Block>> {
        Ok(self.engine.store().block(block_id)?)
    }

    pub fn get_block_by_hash(&self, hash: &QuadritDigest) -> LedgerResult<Option<Block>> {
        Ok(self.engine.store().block_by_hash(hash)?)
    }

    pub fn is_final(&self, hash: &QuadritDigest) -> LedgerResult<bool> {
        Ok(self.engine.store().contains_block(hash)?)
    }

    /// A transaction by hash, from the store (final) or the pool (pending).
    pub fn get_transaction(
        &self,
        hash: &QuadritDigest,
    ) -> LedgerResult<Option<(Transaction, TransactionStatus)>> {
        if let Some(tx) = self.engine.store().transaction(hash)? {
            return Ok(Some((tx, TransactionStatus::Final)));
        }
        Ok(self.pool.get(hash).map(|tx| (tx, TransactionStatus::Pending)))
    }

    /// Checks a Neo Seal. Pure; touches no ledger state.
    pub fn verify_signature(
        public_system: &PublicSystem,
        message_hash: &QuadritDigest,
        seal: &NeoSeal,
    ) -> bool {
        seal::verify(public_system, message_hash, seal)
    }

    /// Re-walks the whole stored chain. Returns its height.
    pub fn verify_chain(&self) -> LedgerResult<u64> {
        Ok(self.engine.verify_chain()?)
    }

    pub fn tip(&self) -> ChainTip {
        self.engine.tip()
    }

    pub fn validator_set(&self) -> Arc<ValidatorSet> {
        self.engine.validator_set()
    }

    pub fn update_validator_set(&self, validators: ValidatorSet) {
        self.engine.update_validator_set(validators);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Validator;
    use crate::transaction::TransactionBuilder;
    use std::sync::OnceLock;

    fn validators() -> &'static Vec<Validator> {
        static V: OnceLock<Vec<Validator>> = OnceLock::new();
        V.get_or_init(|| {
            (0..4u8)
                .map(|i| Validator::from_seed(format!("v{i}"), &[b'L', i]))
                .collect()
        })
    }

    fn ledger() -> Ledger {
        let set = ValidatorSet::from_public_systems(
            validators().iter().map(|v| Arc::clone(v.public_system())),
        );
        Ledger::in_memory(set).unwrap()
    }

    fn make_tx(n: u64) -> Transaction {
        TransactionBuilder::new()
            .sender("alice")
            .recipient("bob")
            .amount(n)
            .timestamp(1_700_000_000_000 + n)
            .build()
            .unwrap()
    }

    fn attest_all(ledger: &Ledger, hash: QuadritDigest, count: usize) -> Vec<AttestationOutcome> {
        let block = ledger.candidate_block(&hash).unwrap();
        let tip = ledger.tip();
        validators()[..count]
            .iter()
            .map(|v| {
                let att = v.attest(&block, &tip, ledger.pool()).unwrap();
                ledger.submit_attestation(att).unwrap()
            })
            .collect()
    }

    #[test]
    fn end_to_end_single_block() {
        let ledger = ledger();
        let txs: Vec<_> = (0..3).map(make_tx).collect();
        for tx in &txs {
            assert_eq!(ledger.submit_transaction(tx.clone()).unwrap(), SubmitOutcome::Accepted);
        }

        let template = ledger.build_template("proposer", 10).unwrap();
        assert_eq!(template.len(), 3);
        assert!(ledger.build_template("proposer", 10).is_none());

        let handle = ledger.propose_template(template).unwrap();
        let outcomes = attest_all(&ledger, handle.block_hash, 3);
        assert_eq!(outcomes[2], AttestationOutcome::Finalized { block_id: 0 });

        assert!(ledger.is_final(&handle.block_hash).unwrap());
        assert!(ledger.pool().is_empty());
        let (tx, status) = ledger.get_transaction(&txs[1].hash()).unwrap().unwrap();
        assert_eq!(tx, txs[1]);
        assert_eq!(status, TransactionStatus::Final);
        assert_eq!(
            ledger.submit_transaction(txs[0].clone()).unwrap(),
            SubmitOutcome::AlreadyFinal
        );
        assert_eq!(ledger.verify_chain().unwrap(), 1);
    }

    #[test]
    fn malformed_transaction_maps_to_ledger_error() {
        let ledger = ledger();
        let tx = Transaction::new("", "bob", 1, 1, None, Default::default());
        assert!(matches!(
            ledger.submit_transaction(tx),
            Err(LedgerError::MalformedTransaction(TransactionError::EmptySender))
        ));
    }

    #[test]
    fn rejection_returns_transactions_to_pending() {
        let ledger = ledger();
        ledger.submit_transaction(make_tx(1)).unwrap();
        let template = ledger.build_template("p", 10).unwrap();
        assert_eq!(ledger.pool().pending_count(), 0);

        let handle = ledger.propose_template(template).unwrap();
        ledger.reject_candidate(&handle.block_hash, "test").unwrap();
        assert_eq!(ledger.pool().pending_count(), 1);
        assert!(ledger.build_template("p", 10).is_some());
    }

    #[test]
    fn late_attestation_returns_transactions_to_pool() {
        let set = ValidatorSet::from_public_systems(
            validators().iter().map(|v| Arc::clone(v.public_system())),
        );
        let finality = FinalityConfig {
            candidate_timeout_ms: 20,
            ..FinalityConfig::default()
        };
        let ledger = Ledger::new(
            Arc::new(MemoryStore::new()),
            set,
            finality,
            PoolConfig::default(),
        )
        .unwrap();

        ledger.submit_transaction(make_tx(1)).unwrap();
        let template = ledger.build_template("p", 10).unwrap();
        let handle = ledger.propose_template(template).unwrap();
        let block = ledger.candidate_block(&handle.block_hash).unwrap();
        let tip = ledger.tip();
        let first = validators()[0].attest(&block, &tip, ledger.pool()).unwrap();
        let second = validators()[1].attest(&block, &tip, ledger.pool()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));

        assert!(matches!(
            ledger.submit_attestation(first),
            Err(LedgerError::Cip(CipError::CandidateRejected {
                reason: RejectReason::Timeout,
                ..
            }))
        ));
        assert_eq!(ledger.pool().pending_count(), 1);
        assert!(ledger.expire_stale().is_empty());
        assert_eq!(ledger.prune_settled(), 1);

        let retry = ledger.build_template("p", 10).unwrap();
        assert_eq!(retry.len(), 1);

        // A second late attestation cannot free what the retry now holds.
        assert!(ledger.submit_attestation(second).is_err());
        assert_eq!(ledger.pool().pending_count(), 0);
    }

    #[test]
    fn unclaimed_rejection_is_released_by_expire_stale() {
        let ledger = ledger();
        ledger.submit_transaction(make_tx(1)).unwrap();
        let handle = ledger
            .propose_template(ledger.build_template("p", 10).unwrap())
            .unwrap();
        ledger.engine().reject(&handle.block_hash, "operator").unwrap();
        assert_eq!(ledger.pool().pending_count(), 0);

        let released = ledger.expire_stale();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, handle.block_hash);
        assert_eq!(ledger.pool().pending_count(), 1);
        assert!(ledger.expire_stale().is_empty());
    }

    #[test]
    fn duplicate_proposal_keeps_reservation() {
        let ledger = ledger();
        ledger.submit_transaction(make_tx(1)).unwrap();
        let template = ledger.build_template("p", 10).unwrap();
        let handle = ledger.propose_template(template.clone()).unwrap();

        assert!(matches!(
            ledger.propose_template(template),
            Err(LedgerError::Cip(CipError::DuplicateCandidate(h))) if h == handle.block_hash
        ));
        assert_eq!(ledger.pool().pending_count(), 0);
        assert!(ledger.build_template("q", 10).is_none());
        assert_eq!(ledger.engine().open_candidates(), vec![handle.block_hash]);
    }

    #[test]
    fn failed_proposal_releases_reservation() {
        let ledger = ledger();
        let tx = make_tx(1);
        ledger.submit_transaction(tx.clone()).unwrap();
        let reserved = ledger.build_template("p", 10).unwrap();

        let ghost = make_tx(99).hash();
        let mut refs = reserved.transactions().to_vec();
        refs.push(ghost);
        let bad = RnaTemplate::new("p", 0, refs, Default::default());
        assert!(matches!(
            ledger.propose_template(bad),
            Err(LedgerError::Template(TemplateError::DanglingReference(h))) if h == ghost
        ));
        assert_eq!(ledger.pool().pending_count(), 1);
    }

    #[test]
    fn pending_transaction_lookup() {
        let ledger = ledger();
        let tx = make_tx(5);
        ledger.submit_transaction(tx.clone()).unwrap();
        let (_, status) = ledger.get_transaction(&tx.hash()).unwrap().unwrap();
        assert_eq!(status, TransactionStatus::Pending);
        assert!(ledger.get_transaction(&make_tx(6).hash()).unwrap().is_none());
    }
}
