//! Shared value types and the canonical byte writer.
//!
//! Transactions, templates, and blocks all hash a canonical byte form of
//! their fields. The helpers here are the only way those bytes get built, so
//! the three formats stay consistent: every variable-length field is a
//! little-endian `u32` length followed by its bytes, integers are fixed-width
//! little-endian, and maps are written in key order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::verification::TransactionError;
use crate::config::{MAX_METADATA_ENTRIES, MAX_METADATA_KEY_LENGTH, MAX_METADATA_VALUE_LENGTH};
use crate::crypto::hash::QuadritDigest;

/// Key/value annotations on a transaction or template. A `BTreeMap` so
/// iteration (and therefore hashing) order is fixed.
///
/// Keys and values are UTF-8 text, not arbitrary bytes: the JSON API carries
/// them as strings. Callers with binary payloads encode them first (hex or
/// base64). The ledger never interprets a value. Limits in
/// [`validate_metadata`] count encoded bytes, not characters.
pub type Metadata = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Where a transaction currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Accepted into the intake pool, not yet in a final block.
    Pending,
    /// Included in a finalized block.
    Final,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Final => write!(f, "Final"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata limits
// ---------------------------------------------------------------------------

/// Checks entry count and key/value sizes.
pub fn validate_metadata(metadata: &Metadata) -> Result<(), TransactionError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(TransactionError::TooManyMetadataEntries {
            count: metadata.len(),
            max: MAX_METADATA_ENTRIES,
        });
    }
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(TransactionError::EmptyMetadataKey);
        }
        if key.len() > MAX_METADATA_KEY_LENGTH {
            return Err(TransactionError::MetadataKeyTooLong {
                key: key.clone(),
                max: MAX_METADATA_KEY_LENGTH,
            });
        }
        if value.len() > MAX_METADATA_VALUE_LENGTH {
            return Err(TransactionError::MetadataValueTooLong {
                key: key.clone(),
                max: MAX_METADATA_VALUE_LENGTH,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Canonical bytes
// ---------------------------------------------------------------------------

/// Appends a length-prefixed byte string.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Appends a fixed-width integer.
pub(crate) fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Appends a digest (fixed width, no prefix).
pub(crate) fn put_digest(buf: &mut Vec<u8>, d: &QuadritDigest) {
    buf.extend_from_slice(d.as_bytes());
}

/// Appends a metadata map: entry count, then each key and value.
pub(crate) fn put_metadata(buf: &mut Vec<u8>, metadata: &Metadata) {
    buf.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    for (key, value) in metadata {
        put_bytes(buf, key.as_bytes());
        put_bytes(buf, value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_and_serde() {
        assert_eq!(TransactionStatus::Pending.to_string(), "Pending");
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Final).unwrap(),
            "\"final\""
        );
    }

    #[test]
    fn metadata_limits() {
        let mut md = Metadata::new();
        md.insert("memo".into(), "coffee".into());
        assert!(validate_metadata(&md).is_ok());

        md.insert(String::new(), "x".into());
        assert!(matches!(
            validate_metadata(&md),
            Err(TransactionError::EmptyMetadataKey)
        ));

        let mut long_key = Metadata::new();
        long_key.insert("k".repeat(MAX_METADATA_KEY_LENGTH + 1), "v".into());
        assert!(matches!(
            validate_metadata(&long_key),
            Err(TransactionError::MetadataKeyTooLong { .. })
        ));

        let mut long_value = Metadata::new();
        long_value.insert("k".into(), "v".repeat(MAX_METADATA_VALUE_LENGTH + 1));
        assert!(matches!(
            validate_metadata(&long_value),
            Err(TransactionError::MetadataValueTooLong { .. })
        ));

        let many: Metadata = (0..=MAX_METADATA_ENTRIES)
            .map(|i| (format!("k{i}"), String::new()))
            .collect();
        assert!(matches!(
            validate_metadata(&many),
            Err(TransactionError::TooManyMetadataEntries { .. })
        ));
    }

    #[test]
    fn metadata_values_are_text_measured_in_bytes() {
        // Four bytes per character: a quarter of the limit in chars is the limit.
        let wide = "\u{1F600}".repeat(MAX_METADATA_VALUE_LENGTH / 4);
        let mut md = Metadata::new();
        md.insert("emoji".into(), wide.clone());
        assert!(validate_metadata(&md).is_ok());

        md.insert("emoji".into(), format!("{wide}x"));
        assert!(matches!(
            validate_metadata(&md),
            Err(TransactionError::MetadataValueTooLong { .. })
        ));

        // Binary payloads travel hex-encoded and come back unchanged.
        let mut blob = Metadata::new();
        blob.insert("blob".into(), hex::encode([0u8, 0xff, 0x10]));
        let json = serde_json::to_string(&blob).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(hex::decode(&back["blob"]).unwrap(), vec![0u8, 0xff, 0x10]);
    }

    #[test]
    fn length_prefix_prevents_ambiguity() {
        // ("ab", "c") and ("a", "bc") must not serialize the same.
        let mut a = Vec::new();
        put_bytes(&mut a, b"ab");
        put_bytes(&mut a, b"c");
        let mut b = Vec::new();
        put_bytes(&mut b, b"a");
        put_bytes(&mut b, b"bc");
        assert_ne!(a, b);
    }

    #[test]
    fn metadata_order_is_canonical() {
        let mut first = Metadata::new();
        first.insert("b".into(), "2".into());
        first.insert("a".into(), "1".into());
        let mut second = Metadata::new();
        second.insert("a".into(), "1".into());
        second.insert("b".into(), "2".into());

        let (mut x, mut y) = (Vec::new(), Vec::new());
        put_metadata(&mut x, &first);
        put_metadata(&mut y, &second);
        assert_eq!(x, y);
    }
}
