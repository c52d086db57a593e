//! The [`Transaction`] type and its builder.
//!
//! A transaction is immutable once built: all fields are private and the
//! hash is computed in the constructor. The [`TransactionBuilder`] is the
//! friendly way to make one; it fills in the timestamp and validates the
//! result before handing it back.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{put_bytes, put_metadata, put_u64, Metadata};
use super::verification::{validate_transaction, TransactionError};
use crate::config::TX_DOMAIN_TAG;
use crate::crypto::hash::{hash_bytes, QuadritDigest};
use crate::crypto::quadrit::{decode_to_string, encode_str, QuadritSequence};

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A value transfer recorded on the ledger.
///
/// `hash` is the Quadrit hash of [`Transaction::canonical_bytes`], which
/// covers every other field. Two transactions with identical fields have the
/// same hash and are the same transaction as far as the ledger cares.
///
/// # Canonical Byte Format
///
/// ```text
/// TX_DOMAIN_TAG
/// len | sender
/// len | recipient
/// amount      (u64 LE)
/// timestamp   (u64 LE, unix ms)
/// 0x00 | 0x01 len | payload letters
/// count | (len | key, len | value)*   (key order)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    sender: String,
    recipient: String,
    amount: u64,
    /// Unix timestamp in milliseconds.
    timestamp: u64,
    /// Optional quadrit-encoded data.
    #[serde(default)]
    payload: Option<QuadritSequence>,
    #[serde(default)]
    metadata: Metadata,
    hash: QuadritDigest,
}

impl Transaction {
    /// Creates a transaction and computes its hash. Does not validate; use
    /// [`TransactionBuilder::build`] or [`Transaction::validate`] for that.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: u64,
        timestamp: u64,
        payload: Option<QuadritSequence>,
        metadata: Metadata,
    ) -> Self {
        let mut tx = Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            timestamp,
            payload,
            metadata,
            hash: QuadritDigest::ZERO,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn payload(&self) -> Option<&QuadritSequence> {
        self.payload.as_ref()
    }

    /// The payload decoded as UTF-8 text, if there is one and it decodes.
    pub fn payload_text(&self) -> Option<String> {
        self.payload.as_ref().and_then(|p| decode_to_string(p).ok())
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn hash(&self) -> QuadritDigest {
        self.hash
    }

    /// The bytes the hash is computed over. See the type docs for layout.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(TX_DOMAIN_TAG);
        put_bytes(&mut buf, self.sender.as_bytes());
        put_bytes(&mut buf, self.recipient.as_bytes());
        put_u64(&mut buf, self.amount);
        put_u64(&mut buf, self.timestamp);
        match &self.payload {
            Some(payload) => {
                buf.push(0x01);
                put_bytes(&mut buf, payload.to_string().as_bytes());
            }
            None => buf.push(0x00),
        }
        put_metadata(&mut buf, &self.metadata);
        buf
    }

    /// Recomputes the hash from the current fields.
    pub fn compute_hash(&self) -> QuadritDigest {
        hash_bytes(&self.canonical_bytes())
    }

    /// Full validity check. See [`validate_transaction`].
    pub fn validate(&self) -> Result<(), TransactionError> {
        validate_transaction(self)
    }

    /// `validate().is_ok()`.
    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Transaction`].
///
/// # Usage
///
/// ```
/// use helix_protocol::transaction::TransactionBuilder;
///
/// let tx = TransactionBuilder::new()
///     .sender("alice")
///     .recipient("bob")
///     .amount(250)
///     .data("rent, march")
///     .meta("channel", "mobile")
///     .build()
///     .unwrap();
/// assert_eq!(tx.payload_text().as_deref(), Some("rent, march"));
/// ```
///
/// The timestamp defaults to the current UTC time at build.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    sender: String,
    recipient: String,
    amount: u64,
    timestamp: Option<u64>,
    payload: Option<QuadritSequence>,
    metadata: Metadata,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_string();
        self
    }

    pub fn recipient(mut self, recipient: &str) -> Self {
        self.recipient = recipient.to_string();
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    /// Overrides the timestamp (unix ms). Mostly for tests and replay.
    pub fn timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    /// Attaches text data, stored in quadrit form.
    pub fn data(mut self, text: &str) -> Self {
        self.payload = Some(encode_str(text));
        self
    }

    /// Attaches an already-encoded payload.
    pub fn payload(mut self, payload: QuadritSequence) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds one metadata entry. Later entries overwrite earlier ones.
    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Replaces all metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builds and validates.
    pub fn build(self) -> Result<Transaction, TransactionError> {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis().max(0) as u64);
        let tx = Transaction::new(
            self.sender,
            self.recipient,
            self.amount,
            timestamp,
            self.payload,
            self.metadata,
        );
        tx.validate()?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        TransactionBuilder::new()
            .sender("alice")
            .recipient("bob")
            .amount(42)
            .timestamp(1_700_000_000_000)
            .meta("memo", "lunch")
            .build()
            .unwrap()
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(sample().hash(), sample().hash());
        assert_eq!(sample().hash(), sample().compute_hash());
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let base = sample();
        let variants = [
            Transaction::new("alice2", "bob", 42, base.timestamp(), None, base.metadata().clone()),
            Transaction::new("alice", "bob2", 42, base.timestamp(), None, base.metadata().clone()),
            Transaction::new("alice", "bob", 43, base.timestamp(), None, base.metadata().clone()),
            Transaction::new("alice", "bob", 42, base.timestamp() + 1, None, base.metadata().clone()),
            Transaction::new("alice", "bob", 42, base.timestamp(), Some(encode_str("x")), base.metadata().clone()),
            Transaction::new("alice", "bob", 42, base.timestamp(), None, Metadata::new()),
        ];
        for v in &variants {
            assert_ne!(v.hash(), base.hash());
        }
    }

    #[test]
    fn default_timestamp_is_now() {
        let before = Utc::now().timestamp_millis() as u64;
        let tx = TransactionBuilder::new()
            .sender("a")
            .recipient("b")
            .build()
            .unwrap();
        let after = Utc::now().timestamp_millis() as u64;
        assert!(tx.timestamp() >= before && tx.timestamp() <= after);
    }

    #[test]
    fn payload_round_trips_through_quadrits() {
        let tx = TransactionBuilder::new()
            .sender("a")
            .recipient("b")
            .data("Quadrit payload")
            .build()
            .unwrap();
        assert_eq!(tx.payload().unwrap().len(), "Quadrit payload".len() * 4);
        assert_eq!(tx.payload_text().as_deref(), Some("Quadrit payload"));
    }

    #[test]
    fn serde_round_trip_keeps_hash() {
        let tx = sample();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
        assert!(back.is_well_formed());

        let bin = bincode::serialize(&tx).unwrap();
        let back: Transaction = bincode::deserialize(&bin).unwrap();
        assert_eq!(back.hash(), tx.hash());
    }
}
