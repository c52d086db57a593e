//! Transaction validity checks.
//!
//! Every transaction entering the pool must pass [`validate_transaction`].
//! The checks are ordered from cheapest to most expensive (length checks
//! before re-hashing) so malformed input fails fast.
//!
//! There is no signature on a transaction. Authorization is external to the
//! core; what the ledger guarantees is integrity: a transaction's hash covers
//! every field, and anything that doesn't re-hash to its claimed hash is
//! rejected.

use thiserror::Error;

use super::builder::Transaction;
use super::types::validate_metadata;
use crate::config::{MAX_ADDRESS_LENGTH, MAX_PAYLOAD_QUADRITS};
use crate::crypto::hash::QuadritDigest;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a transaction is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("sender must not be empty")]
    EmptySender,

    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error("{field} is {len} bytes, longer than {max}")]
    AddressTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("payload is {len} quadrits, longer than {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("metadata has {count} entries, more than {max}")]
    TooManyMetadataEntries { count: usize, max: usize },

    #[error("metadata keys must not be empty")]
    EmptyMetadataKey,

    #[error("metadata key {key:?} is longer than {max} bytes")]
    MetadataKeyTooLong { key: String, max: usize },

    #[error("metadata value for {key:?} is longer than {max} bytes")]
    MetadataValueTooLong { key: String, max: usize },

    /// The stored hash does not match the hash of the fields.
    #[error("transaction hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: QuadritDigest,
        actual: QuadritDigest,
    },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks a transaction for well-formedness.
///
/// 1. **Sender / recipient**: non-empty, at most `MAX_ADDRESS_LENGTH` bytes.
/// 2. **Payload**: at most `MAX_PAYLOAD_QUADRITS` symbols.
/// 3. **Metadata**: entry count and key/value sizes.
/// 4. **Hash**: must equal the Quadrit hash of the canonical bytes.
///
/// `amount` needs no check: it is unsigned. Per-sender timestamp ordering is
/// advisory and is watched by the pool, not enforced here.
pub fn validate_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    check_address("sender", tx.sender(), TransactionError::EmptySender)?;
    check_address("recipient", tx.recipient(), TransactionError::EmptyRecipient)?;

    if let Some(payload) = tx.payload() {
        if payload.len() > MAX_PAYLOAD_QUADRITS {
            return Err(TransactionError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD_QUADRITS,
            });
        }
    }

    validate_metadata(tx.metadata())?;

    let expected = tx.compute_hash();
    if expected != tx.hash() {
        return Err(TransactionError::HashMismatch {
            expected,
            actual: tx.hash(),
        });
    }

    Ok(())
}

fn check_address(
    field: &'static str,
    value: &str,
    empty: TransactionError,
) -> Result<(), TransactionError> {
    if value.trim().is_empty() {
        return Err(empty);
    }
    if value.len() > MAX_ADDRESS_LENGTH {
        return Err(TransactionError::AddressTooLong {
            field,
            len: value.len(),
            max: MAX_ADDRESS_LENGTH,
        });
    }
    Ok(())
}
