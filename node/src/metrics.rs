//! # Prometheus Metrics
//!
//! Operational metrics for the node, served at `/metrics`. Everything lives
//! in a dedicated registry under the `helix` namespace.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Handles to every metric the node records. Clones share the underlying
/// collectors.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Transactions accepted into the pool.
    pub transactions_submitted_total: IntCounter,
    /// Transactions refused at intake, by reason.
    pub transactions_rejected_total: IntCounterVec,
    /// Transactions currently pending or reserved in the pool.
    pub transactions_pending: IntGauge,
    /// Candidates opened for attestation.
    pub candidates_proposed_total: IntCounter,
    /// Candidates rejected, by reason.
    pub candidates_rejected_total: IntCounterVec,
    /// Attestations the engine accepted.
    pub attestations_total: IntCounter,
    /// Blocks finalized.
    pub blocks_finalized_total: IntCounter,
    /// Transactions included in finalized blocks.
    pub transactions_finalized_total: IntCounter,
    /// Next block id; equals the number of finalized blocks.
    pub chain_height: IntGauge,
    /// Wall time of one Neo Seal signing, including review.
    pub attestation_seconds: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("helix".into()), None)?;

        let transactions_submitted_total = IntCounter::new(
            "transactions_submitted_total",
            "Transactions accepted into the pool",
        )?;
        let transactions_rejected_total = IntCounterVec::new(
            Opts::new(
                "transactions_rejected_total",
                "Transactions refused at intake",
            ),
            &["reason"],
        )?;
        let transactions_pending = IntGauge::new(
            "transactions_pending",
            "Transactions currently held by the pool",
        )?;
        let candidates_proposed_total = IntCounter::new(
            "candidates_proposed_total",
            "Candidate blocks opened for attestation",
        )?;
        let candidates_rejected_total = IntCounterVec::new(
            Opts::new("candidates_rejected_total", "Candidate blocks rejected"),
            &["reason"],
        )?;
        let attestations_total =
            IntCounter::new("attestations_total", "CIP attestations accepted")?;
        let blocks_finalized_total =
            IntCounter::new("blocks_finalized_total", "Blocks finalized")?;
        let transactions_finalized_total = IntCounter::new(
            "transactions_finalized_total",
            "Transactions included in finalized blocks",
        )?;
        let chain_height = IntGauge::new("chain_height", "Number of finalized blocks")?;
        let attestation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "attestation_seconds",
                "Time for one validator to review and seal a candidate",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;

        registry.register(Box::new(transactions_submitted_total.clone()))?;
        registry.register(Box::new(transactions_rejected_total.clone()))?;
        registry.register(Box::new(transactions_pending.clone()))?;
        registry.register(Box::new(candidates_proposed_total.clone()))?;
        registry.register(Box::new(candidates_rejected_total.clone()))?;
        registry.register(Box::new(attestations_total.clone()))?;
        registry.register(Box::new(blocks_finalized_total.clone()))?;
        registry.register(Box::new(transactions_finalized_total.clone()))?;
        registry.register(Box::new(chain_height.clone()))?;
        registry.register(Box::new(attestation_seconds.clone()))?;

        Ok(Self {
            registry,
            transactions_submitted_total,
            transactions_rejected_total,
            transactions_pending,
            candidates_proposed_total,
            candidates_rejected_total,
            attestations_total,
            blocks_finalized_total,
            transactions_finalized_total,
            chain_height,
            attestation_seconds,
        })
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_encodes() {
        let m = NodeMetrics::new().unwrap();
        m.blocks_finalized_total.inc();
        m.chain_height.set(7);
        m.candidates_rejected_total
            .with_label_values(&["timeout"])
            .inc();

        let text = m.encode().unwrap();
        assert!(text.contains("helix_blocks_finalized_total 1"));
        assert!(text.contains("helix_chain_height 7"));
        assert!(text.contains("reason=\"timeout\""));
    }

    #[test]
    fn instances_do_not_share_registries() {
        let a = NodeMetrics::new().unwrap();
        let b = NodeMetrics::new().unwrap();
        a.attestations_total.inc();
        assert!(b.encode().unwrap().contains("helix_attestations_total 0"));
    }
}
