//! Shared node state: the ledger plus the side effects every write path
//! has in common (metrics and the event stream).
//!
//! HTTP handlers and the background tasks go through [`AppState`] rather
//! than the ledger directly, so a block finalized by a remote attestation
//! is counted and announced the same way as one finalized in-process.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use helix_protocol::consensus::{AttestationOutcome, CandidateHandle, CipAttestation, RejectReason};
use helix_protocol::crypto::hash::QuadritDigest;
use helix_protocol::transaction::{SubmitOutcome, Transaction};
use helix_protocol::{Ledger, LedgerError, LedgerResult};

use crate::metrics::SharedMetrics;

/// Capacity of the event channel. Subscribers that fall further behind
/// than this see `Lagged` and skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Things that happened to the ledger, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    TransactionAccepted {
        hash: QuadritDigest,
    },
    CandidateProposed {
        block_hash: QuadritDigest,
        block_id: u64,
        transactions: usize,
    },
    BlockFinalized {
        block_hash: QuadritDigest,
        block_id: u64,
    },
    CandidateRejected {
        block_hash: QuadritDigest,
        reason: String,
    },
}

/// Cheap to clone; everything is behind an `Arc` or a channel handle.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub ledger: Arc<Ledger>,
    pub metrics: SharedMetrics,
    pub events: broadcast::Sender<NodeEvent>,
}

impl AppState {
    pub fn new(version: String, ledger: Arc<Ledger>, metrics: SharedMetrics) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Self {
            version,
            ledger,
            metrics,
            events,
        };
        state.refresh_gauges();
        state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// No subscribers is not an error; the event is simply dropped.
    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }

    fn refresh_gauges(&self) {
        self.metrics
            .transactions_pending
            .set(self.ledger.pool().size() as i64);
        self.metrics
            .chain_height
            .set(self.ledger.tip().next_block_id as i64);
    }

    pub fn submit_transaction(&self, tx: Transaction) -> LedgerResult<SubmitOutcome> {
        let hash = tx.hash();
        match self.ledger.submit_transaction(tx) {
            Ok(SubmitOutcome::Accepted) => {
                self.metrics.transactions_submitted_total.inc();
                self.refresh_gauges();
                self.emit(NodeEvent::TransactionAccepted { hash });
                Ok(SubmitOutcome::Accepted)
            }
            Ok(other) => Ok(other),
            Err(e) => {
                let reason = match &e {
                    LedgerError::MalformedTransaction(_) => "malformed",
                    LedgerError::Pool(_) => "pool_limit",
                    _ => "internal",
                };
                self.metrics
                    .transactions_rejected_total
                    .with_label_values(&[reason])
                    .inc();
                Err(e)
            }
        }
    }

    pub fn submit_attestation(&self, att: CipAttestation) -> LedgerResult<AttestationOutcome> {
        let block_hash = att.block_hash;
        let outcome = self.ledger.submit_attestation(att)?;
        match outcome {
            AttestationOutcome::Accepted { .. } => self.metrics.attestations_total.inc(),
            AttestationOutcome::Finalized { block_id } => {
                self.metrics.attestations_total.inc();
                self.metrics.blocks_finalized_total.inc();
                if let Some(snapshot) = self.ledger.candidate_snapshot(&block_hash) {
                    self.metrics
                        .transactions_finalized_total
                        .inc_by(snapshot.transactions as u64);
                }
                self.refresh_gauges();
                info!(block_id, hash = %block_hash.short(), "block final");
                self.emit(NodeEvent::BlockFinalized {
                    block_hash,
                    block_id,
                });
            }
            AttestationOutcome::Duplicate => {}
        }
        Ok(outcome)
    }

    /// Turns up to `max` pending transactions into a candidate, unless a
    /// candidate is already open. Returns the new candidate, if any.
    pub fn propose_next(&self, proposer: &str, max: usize) -> LedgerResult<Option<CandidateHandle>> {
        if !self.ledger.engine().open_candidates().is_empty() {
            return Ok(None);
        }
        let Some(template) = self.ledger.build_template(proposer, max) else {
            return Ok(None);
        };
        let handle = self.ledger.propose_template(template)?;
        self.metrics.candidates_proposed_total.inc();
        debug!(
            hash = %handle.block_hash.short(),
            block_id = handle.block_id,
            txs = handle.transactions,
            "candidate proposed"
        );
        self.emit(NodeEvent::CandidateProposed {
            block_hash: handle.block_hash,
            block_id: handle.block_id,
            transactions: handle.transactions,
        });
        Ok(Some(handle))
    }

    /// Rejects timed-out and superseded candidates, then drops settled
    /// ones from the engine.
    pub fn expire_stale(&self) -> Vec<(QuadritDigest, RejectReason)> {
        let rejected = self.ledger.expire_stale();
        for (block_hash, reason) in &rejected {
            let label = match reason {
                RejectReason::Timeout => "timeout",
                RejectReason::TipMoved => "tip_moved",
                RejectReason::Explicit(_) => "explicit",
            };
            self.metrics
                .candidates_rejected_total
                .with_label_values(&[label])
                .inc();
            self.emit(NodeEvent::CandidateRejected {
                block_hash: *block_hash,
                reason: reason.to_string(),
            });
        }
        let pruned = self.ledger.prune_settled();
        if pruned > 0 {
            debug!(pruned, "settled candidates pruned");
        }
        if !rejected.is_empty() {
            warn!(count = rejected.len(), "candidates rejected");
            self.refresh_gauges();
        }
        rejected
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use helix_protocol::consensus::{Validator, ValidatorSet};
    use helix_protocol::transaction::TransactionBuilder;

    use super::*;
    use crate::metrics::NodeMetrics;

    pub fn validators() -> &'static [Arc<Validator>] {
        static VALIDATORS: OnceLock<Vec<Arc<Validator>>> = OnceLock::new();
        VALIDATORS.get_or_init(|| {
            (0..4)
                .map(|i| {
                    let seed = format!("node-test-{i}");
                    Arc::new(Validator::from_seed(format!("v{i}"), seed.as_bytes()))
                })
                .collect()
        })
    }

    pub fn app_state() -> AppState {
        let set = ValidatorSet::from_public_systems(
            validators().iter().map(|v| Arc::clone(v.public_system())),
        );
        let ledger = Arc::new(Ledger::in_memory(set).unwrap());
        AppState::new(
            "0.1.0-test".into(),
            ledger,
            Arc::new(NodeMetrics::new().unwrap()),
        )
    }

    pub fn make_tx(n: u64) -> Transaction {
        TransactionBuilder::new()
            .sender("alice")
            .recipient("bob")
            .amount(500 + n)
            .timestamp(1_000_000 + n)
            .build()
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn accepted_transaction_is_announced_and_counted() {
        let state = app_state();
        let mut rx = state.subscribe();
        let tx = make_tx(1);
        let hash = tx.hash();

        assert_eq!(state.submit_transaction(tx.clone()).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(state.submit_transaction(tx).unwrap(), SubmitOutcome::Duplicate);

        assert_eq!(rx.try_recv().unwrap(), NodeEvent::TransactionAccepted { hash });
        assert!(rx.try_recv().is_err());
        assert_eq!(state.metrics.transactions_submitted_total.get(), 1);
        assert_eq!(state.metrics.transactions_pending.get(), 1);
    }

    #[test]
    fn one_candidate_in_flight() {
        let state = app_state();
        state.submit_transaction(make_tx(1)).unwrap();
        let first = state.propose_next("node", 10).unwrap();
        assert!(first.is_some());

        state.submit_transaction(make_tx(2)).unwrap();
        assert!(state.propose_next("node", 10).unwrap().is_none());
    }

    #[test]
    fn nothing_pending_proposes_nothing() {
        let state = app_state();
        assert!(state.propose_next("node", 10).unwrap().is_none());
        assert_eq!(state.metrics.candidates_proposed_total.get(), 0);
    }

    #[test]
    fn quorum_finalizes_and_announces() {
        let state = app_state();
        state.submit_transaction(make_tx(1)).unwrap();
        state.submit_transaction(make_tx(2)).unwrap();
        let handle = state.propose_next("node", 10).unwrap().unwrap();
        let mut rx = state.subscribe();

        let mut finalized = None;
        for v in &validators()[..3] {
            let att = CipAttestation::sign(v.keypair(), handle.block_hash).unwrap();
            if let AttestationOutcome::Finalized { block_id } = state.submit_attestation(att).unwrap() {
                finalized = Some(block_id);
            }
        }

        assert_eq!(finalized, Some(0));
        assert_eq!(
            rx.try_recv().unwrap(),
            NodeEvent::BlockFinalized {
                block_hash: handle.block_hash,
                block_id: 0
            }
        );
        assert_eq!(state.metrics.blocks_finalized_total.get(), 1);
        assert_eq!(state.metrics.transactions_finalized_total.get(), 2);
        assert_eq!(state.metrics.chain_height.get(), 1);
        assert_eq!(state.metrics.transactions_pending.get(), 0);
    }
}
