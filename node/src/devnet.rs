//! Background tasks: the batching loop and in-process validators.
//!
//! The batcher wakes every `batch_interval`, expires stale candidates, and
//! proposes a new one from the pool when none is open. Each validator task
//! listens for `CandidateProposed` events, reviews the candidate, and seals
//! it on the blocking pool (signing is CPU-bound).

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use helix_protocol::config::DEVNET_SEED_PREFIX;
use helix_protocol::consensus::{AttestationOutcome, CipError, Validator};
use helix_protocol::crypto::hash::QuadritDigest;
use helix_protocol::LedgerError;

use crate::config::DevnetConfig;
use crate::state::{AppState, NodeEvent};

/// Derives the `count` devnet validators. Validator `i` uses the seed
/// `"{DEVNET_SEED_PREFIX}-{i}"`, so every devnet node agrees on the set.
pub fn devnet_validators(count: usize) -> Vec<Validator> {
    (0..count)
        .map(|i| {
            let seed = format!("{DEVNET_SEED_PREFIX}-{i}");
            Validator::from_seed(format!("devnet-{i}"), seed.as_bytes())
        })
        .collect()
}

/// Starts the batching loop. Runs until aborted.
pub fn spawn_batcher(state: AppState, proposer: String, config: DevnetConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.batch_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = config.batch_interval_ms,
            batch = config.template_batch,
            "batcher started"
        );
        loop {
            interval.tick().await;
            state.expire_stale();
            if let Err(e) = state.propose_next(&proposer, config.template_batch) {
                warn!(error = %e, "proposal failed");
            }
        }
    })
}

/// Starts one validator task. Runs until the event channel closes.
pub fn spawn_validator(state: AppState, validator: Arc<Validator>) -> JoinHandle<()> {
    let mut events = state.subscribe();
    tokio::spawn(async move {
        info!(validator = validator.name(), id = %validator.id().short(), "validator started");
        loop {
            let block_hash = match events.recv().await {
                Ok(NodeEvent::CandidateProposed { block_hash, .. }) => block_hash,
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!(validator = validator.name(), skipped = n, "validator lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let state = state.clone();
            let validator = Arc::clone(&validator);
            let result =
                tokio::task::spawn_blocking(move || review_and_attest(&state, &validator, block_hash))
                    .await;
            if let Err(e) = result {
                warn!(error = %e, "attestation task panicked");
            }
        }
    })
}

/// Reviews the candidate against the current tip and submits a seal if it
/// passes. Outcomes that only mean "someone else got there first" are
/// logged at debug.
fn review_and_attest(state: &AppState, validator: &Validator, block_hash: QuadritDigest) {
    let ledger = &state.ledger;
    let (Some(block), Some(txs)) = (
        ledger.candidate_block(&block_hash),
        ledger.engine().candidate_transactions(&block_hash),
    ) else {
        debug!(hash = %block_hash.short(), "candidate gone before review");
        return;
    };

    let timer = state.metrics.attestation_seconds.start_timer();
    let attestation = validator.attest(&block, &ledger.tip(), txs.as_slice());
    timer.observe_duration();

    let attestation = match attestation {
        Ok(att) => att,
        Err(e) => {
            debug!(validator = validator.name(), hash = %block_hash.short(), error = %e, "declined");
            return;
        }
    };

    match state.submit_attestation(attestation) {
        Ok(AttestationOutcome::Finalized { block_id }) => {
            debug!(validator = validator.name(), block_id, "completed quorum");
        }
        Ok(_) => {}
        Err(LedgerError::Cip(
            CipError::AlreadyFinal(_)
            | CipError::UnknownCandidate(_)
            | CipError::CandidateRejected { .. }
            | CipError::ChainTipMismatch { .. },
        )) => {
            debug!(validator = validator.name(), hash = %block_hash.short(), "attestation moot");
        }
        Err(e) => warn!(validator = validator.name(), error = %e, "attestation refused"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::test_support::{app_state, make_tx, validators};

    #[test]
    fn devnet_seeds_are_stable() {
        let a = devnet_validators(1);
        let b = devnet_validators(1);
        assert_eq!(a[0].id(), b[0].id());
        assert_eq!(a[0].name(), "devnet-0");
    }

    #[test]
    fn review_and_attest_reaches_finality() {
        let state = app_state();
        state.submit_transaction(make_tx(1)).unwrap();
        let handle = state.propose_next("node", 10).unwrap().unwrap();

        for v in &validators()[..3] {
            review_and_attest(&state, v, handle.block_hash);
        }
        assert!(state.ledger.is_final(&handle.block_hash).unwrap());

        // A fourth, late review is a no-op.
        review_and_attest(&state, &validators()[3], handle.block_hash);
        assert_eq!(state.ledger.tip().next_block_id, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn validators_and_batcher_finalize_submitted_transactions() {
        let state = app_state();
        let mut events = state.subscribe();
        let tasks: Vec<_> = validators()
            .iter()
            .map(|v| spawn_validator(state.clone(), Arc::clone(v)))
            .collect();
        let config = DevnetConfig {
            batch_interval_ms: 20,
            ..DevnetConfig::default()
        };
        state.submit_transaction(make_tx(1)).unwrap();
        state.submit_transaction(make_tx(2)).unwrap();
        let batcher = spawn_batcher(state.clone(), "node".into(), config);

        let finalized = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if let Ok(NodeEvent::BlockFinalized { block_id, .. }) = events.recv().await {
                    return block_id;
                }
            }
        })
        .await
        .expect("block finalized in time");

        assert_eq!(finalized, 0);
        assert_eq!(state.ledger.get_block(0).unwrap().unwrap().transaction_hashes().len(), 2);

        batcher.abort();
        for t in tasks {
            t.abort();
        }
    }
}
