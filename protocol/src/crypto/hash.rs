//! # Quadrit Hash
//!
//! The one hash function of the ledger. Every transaction hash, template id,
//! block hash, and key fingerprint is a [`QuadritDigest`] produced here.
//!
//! ## Construction
//!
//! BLAKE3 in `derive_key` mode with [`QUADRIT_HASH_CONTEXT`], fed the ASCII
//! letters of a quadrit sequence:
//!
//! ```text
//!   quadrit_hash(seq) = BLAKE3-derive_key(CTX, "TAATCG...")
//! ```
//!
//! Hashing the letter form (rather than the packed bytes) means the digest is
//! defined over quadrits, and a sequence that isn't byte-aligned still has a
//! well-defined hash. For byte input, [`hash_bytes`] expands each byte to its
//! four letters on the fly and streams them into the hasher, so
//! `hash_bytes(b) == quadrit_hash(&encode(b))` without ever building the
//! sequence.
//!
//! `derive_key` gives us domain separation from every other BLAKE3 use in the
//! process (key expansion in particular) for free.
//!
//! ## Digest Views
//!
//! A digest is 32 bytes. It can also be read as 128 quadrits (the ledger's
//! native form) or as 64 GF(16) elements, high nibble first. The latter is
//! what the Neo Seal signs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::quadrit::{byte_to_letters, encode, QuadritSequence};
use crate::config::{DIGEST_LENGTH, DIGEST_NIBBLES, QUADRIT_HASH_CONTEXT};

/// Errors raised when parsing a digest from text or raw bytes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DigestError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("digest must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// QuadritDigest
// ---------------------------------------------------------------------------

/// A 256-bit Quadrit hash output.
///
/// `Display` and `FromStr` use lowercase hex. Serde uses a hex string in
/// human-readable formats (JSON) and the raw 32 bytes otherwise (bincode),
/// so the same type works for the API and for sled values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QuadritDigest([u8; DIGEST_LENGTH]);

impl QuadritDigest {
    /// The all-zero digest. Used as the previous-hash sentinel of block 0.
    pub const ZERO: QuadritDigest = QuadritDigest([0u8; DIGEST_LENGTH]);

    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Builds a digest from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let arr: [u8; DIGEST_LENGTH] = bytes.try_into().map_err(|_| DigestError::Length {
            expected: DIGEST_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Borrow the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Copy out the raw bytes.
    pub const fn to_bytes(self) -> [u8; DIGEST_LENGTH] {
        self.0
    }

    /// True for the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; DIGEST_LENGTH]
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// First 8 hex characters. Handy for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// The digest as [`DIGEST_QUADRITS`](crate::config::DIGEST_QUADRITS) quadrits.
    pub fn to_quadrits(&self) -> QuadritSequence {
        encode(&self.0)
    }

    /// The digest as 64 nibbles, high nibble of each byte first. Every value
    /// is in `0..16`.
    pub fn to_nibbles(&self) -> [u8; DIGEST_NIBBLES] {
        let mut out = [0u8; DIGEST_NIBBLES];
        for (i, byte) in self.0.iter().enumerate() {
            out[2 * i] = byte >> 4;
            out[2 * i + 1] = byte & 0x0F;
        }
        out
    }
}

impl AsRef<[u8]> for QuadritDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_LENGTH]> for QuadritDigest {
    fn from(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for QuadritDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for QuadritDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuadritDigest({})", self.short())
    }
}

impl FromStr for QuadritDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for QuadritDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for QuadritDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; DIGEST_LENGTH]>::deserialize(deserializer).map(Self)
        }
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Incremental Quadrit hasher.
///
/// [`update`](Self::update) takes bytes and hashes their quadrit form;
/// [`update_sequence`](Self::update_sequence) takes quadrits directly. Both
/// can be mixed: the hasher only ever sees a stream of letters.
#[derive(Clone)]
pub struct QuadritHasher {
    inner: blake3::Hasher,
}

impl QuadritHasher {
    /// Letters expanded per internal chunk before handing them to BLAKE3.
    const CHUNK_BYTES: usize = 256;

    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new_derive_key(QUADRIT_HASH_CONTEXT),
        }
    }

    /// Feeds the quadrit form of `data`.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        let mut letters = [0u8; Self::CHUNK_BYTES * 4];
        for chunk in data.chunks(Self::CHUNK_BYTES) {
            for (i, &byte) in chunk.iter().enumerate() {
                letters[4 * i..4 * i + 4].copy_from_slice(&byte_to_letters(byte));
            }
            self.inner.update(&letters[..chunk.len() * 4]);
        }
        self
    }

    /// Feeds quadrits as-is.
    pub fn update_sequence(&mut self, seq: &QuadritSequence) -> &mut Self {
        let letters: Vec<u8> = seq.iter().map(|q| q.as_char() as u8).collect();
        self.inner.update(&letters);
        self
    }

    pub fn finalize(&self) -> QuadritDigest {
        QuadritDigest(*self.inner.finalize().as_bytes())
    }
}

impl Default for QuadritHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Quadrit hash of a sequence.
///
/// # Example
///
/// ```
/// use helix_protocol::crypto::hash::{hash_bytes, quadrit_hash};
/// use helix_protocol::crypto::quadrit::encode;
///
/// assert_eq!(quadrit_hash(&encode(b"helix")), hash_bytes(b"helix"));
/// ```
pub fn quadrit_hash(seq: &QuadritSequence) -> QuadritDigest {
    QuadritHasher::new().update_sequence(seq).finalize()
}

/// Quadrit hash of the quadrit encoding of `data`.
pub fn hash_bytes(data: &[u8]) -> QuadritDigest {
    QuadritHasher::new().update(data).finalize()
}

/// Quadrit hash of several byte slices, as if they were concatenated.
pub fn hash_parts(parts: &[&[u8]]) -> QuadritDigest {
    let mut hasher = QuadritHasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
