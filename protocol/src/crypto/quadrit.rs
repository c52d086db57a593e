//! # Quadrit Codec
//!
//! The base encoding of the ledger: every byte becomes four symbols over the
//! alphabet {A, T, C, G}, two bits per symbol, most significant pair first.
//!
//! ```text
//!   0x41 = 01 00 00 01  ->  T A A T
//!   0xFF = 11 11 11 11  ->  G G G G
//! ```
//!
//! | Symbol | Bits |
//! |--------|------|
//! | A      | 00   |
//! | T      | 01   |
//! | C      | 10   |
//! | G      | 11   |
//!
//! The mapping is a bijection between byte strings and sequences whose length
//! is a multiple of four. Anything else is a [`MalformedSequenceError`] and is
//! rejected at the boundary. There is no padding mode; a sequence that does
//! not describe whole bytes is not a sequence we produced.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of quadrits needed to carry one byte.
pub const QUADRITS_PER_BYTE: usize = 4;

/// Errors raised when a quadrit sequence cannot be turned back into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedSequenceError {
    #[error("quadrit sequence length {0} is not a multiple of 4")]
    Length(usize),

    #[error("invalid quadrit symbol {symbol:?} at position {position}")]
    Symbol { symbol: char, position: usize },

    #[error("decoded bytes are not valid UTF-8")]
    Utf8,
}

// ---------------------------------------------------------------------------
// Quadrit
// ---------------------------------------------------------------------------

/// A single 4-valued symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Quadrit {
    A = 0,
    T = 1,
    C = 2,
    G = 3,
}

impl Quadrit {
    /// All symbols in bit order.
    pub const ALL: [Quadrit; 4] = [Quadrit::A, Quadrit::T, Quadrit::C, Quadrit::G];

    /// Builds a symbol from the low two bits of `bits`. Higher bits are ignored.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Quadrit::A,
            1 => Quadrit::T,
            2 => Quadrit::C,
            _ => Quadrit::G,
        }
    }

    /// The two-bit value of this symbol.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// The letter used in text form.
    pub const fn as_char(self) -> char {
        match self {
            Quadrit::A => 'A',
            Quadrit::T => 'T',
            Quadrit::C => 'C',
            Quadrit::G => 'G',
        }
    }

    /// Parses a single letter. Only upper-case A/T/C/G are accepted.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(Quadrit::A),
            'T' => Some(Quadrit::T),
            'C' => Some(Quadrit::C),
            'G' => Some(Quadrit::G),
            _ => None,
        }
    }
}

impl fmt::Display for Quadrit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// ASCII letters for the four symbols of `byte`, in encoding order.
///
/// The hasher feeds these straight into BLAKE3 so that hashing bytes never
/// has to materialize a `QuadritSequence`.
pub(crate) const fn byte_to_letters(byte: u8) -> [u8; 4] {
    const LETTERS: [u8; 4] = [b'A', b'T', b'C', b'G'];
    [
        LETTERS[((byte >> 6) & 0b11) as usize],
        LETTERS[((byte >> 4) & 0b11) as usize],
        LETTERS[((byte >> 2) & 0b11) as usize],
        LETTERS[(byte & 0b11) as usize],
    ]
}

// ---------------------------------------------------------------------------
// QuadritSequence
// ---------------------------------------------------------------------------

/// An ordered sequence of quadrits.
///
/// Serializes as its letter string (`"TAAT..."`), which is also what
/// [`Display`](fmt::Display) prints and [`FromStr`] accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct QuadritSequence {
    symbols: Vec<Quadrit>,
}

impl QuadritSequence {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty sequence with room for `capacity` symbols.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            symbols: Vec::with_capacity(capacity),
        }
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True if the sequence has no symbols.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Appends one symbol.
    pub fn push(&mut self, symbol: Quadrit) {
        self.symbols.push(symbol);
    }

    /// Borrow the symbols.
    pub fn as_slice(&self) -> &[Quadrit] {
        &self.symbols
    }

    /// Iterate over the symbols.
    pub fn iter(&self) -> std::slice::Iter<'_, Quadrit> {
        self.symbols.iter()
    }

    /// True if the length describes a whole number of bytes.
    pub fn is_byte_aligned(&self) -> bool {
        self.symbols.len() % QUADRITS_PER_BYTE == 0
    }
}

impl From<Vec<Quadrit>> for QuadritSequence {
    fn from(symbols: Vec<Quadrit>) -> Self {
        Self { symbols }
    }
}

impl FromIterator<Quadrit> for QuadritSequence {
    fn from_iter<I: IntoIterator<Item = Quadrit>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a QuadritSequence {
    type Item = &'a Quadrit;
    type IntoIter = std::slice::Iter<'a, Quadrit>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}

impl fmt::Display for QuadritSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for q in &self.symbols {
            write!(f, "{}", q.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for QuadritSequence {
    type Err = MalformedSequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .enumerate()
            .map(|(position, symbol)| {
                Quadrit::from_char(symbol)
                    .ok_or(MalformedSequenceError::Symbol { symbol, position })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::from)
    }
}

impl From<QuadritSequence> for String {
    fn from(seq: QuadritSequence) -> Self {
        seq.to_string()
    }
}

impl TryFrom<String> for QuadritSequence {
    type Error = MalformedSequenceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encodes bytes as quadrits, four symbols per byte.
///
/// # Example
///
/// ```
/// use helix_protocol::crypto::quadrit::{decode, encode};
///
/// let seq = encode(b"A");
/// assert_eq!(seq.to_string(), "TAAT");
/// assert_eq!(decode(&seq).unwrap(), b"A");
/// ```
pub fn encode(data: &[u8]) -> QuadritSequence {
    let mut seq = QuadritSequence::with_capacity(data.len() * QUADRITS_PER_BYTE);
    for &byte in data {
        seq.push(Quadrit::from_bits(byte >> 6));
        seq.push(Quadrit::from_bits(byte >> 4));
        seq.push(Quadrit::from_bits(byte >> 2));
        seq.push(Quadrit::from_bits(byte));
    }
    seq
}

/// Decodes a quadrit sequence back into bytes.
///
/// Fails with [`MalformedSequenceError::Length`] if the sequence does not
/// describe a whole number of bytes.
pub fn decode(seq: &QuadritSequence) -> Result<Vec<u8>, MalformedSequenceError> {
    if !seq.is_byte_aligned() {
        return Err(MalformedSequenceError::Length(seq.len()));
    }

    Ok(seq
        .as_slice()
        .chunks_exact(QUADRITS_PER_BYTE)
        .map(|chunk| {
            (chunk[0].bits() << 6) | (chunk[1].bits() << 4) | (chunk[2].bits() << 2) | chunk[3].bits()
        })
        .collect())
}

/// Encodes the UTF-8 bytes of `text`.
pub fn encode_str(text: &str) -> QuadritSequence {
    encode(text.as_bytes())
}

/// Decodes a sequence and interprets the bytes as UTF-8.
pub fn decode_to_string(seq: &QuadritSequence) -> Result<String, MalformedSequenceError> {
    let bytes = decode(seq)?;
    String::from_utf8(bytes).map_err(|_| MalformedSequenceError::Utf8)
}

/// Parses letter text and decodes it in one step.
pub fn decode_str(text: &str) -> Result<Vec<u8>, MalformedSequenceError> {
    decode(&text.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(encode(&[0x00]).to_string(), "AAAA");
        assert_eq!(encode(&[0xFF]).to_string(), "GGGG");
        assert_eq!(encode(&[0x1B]).to_string(), "ATCG");
        assert_eq!(encode(b"A").to_string(), "TAAT");
    }

    #[test]
    fn round_trip_all_single_bytes() {
        for b in 0..=255u8 {
            let seq = encode(&[b]);
            assert_eq!(seq.len(), 4);
            assert_eq!(decode(&seq).unwrap(), vec![b]);
        }
    }

    #[test]
    fn round_trip_text() {
        let original = "Helix: the birth of a star!";
        let seq = encode_str(original);
        assert_eq!(decode_to_string(&seq).unwrap(), original);
    }

    #[test]
    fn empty_input() {
        let seq = encode(b"");
        assert!(seq.is_empty());
        assert_eq!(decode(&seq).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn misaligned_length_rejected() {
        let seq: QuadritSequence = "TAA".parse().unwrap();
        assert_eq!(decode(&seq), Err(MalformedSequenceError::Length(3)));
    }

    #[test]
    fn foreign_symbol_rejected() {
        let err = "TAAX".parse::<QuadritSequence>().unwrap_err();
        assert_eq!(
            err,
            MalformedSequenceError::Symbol {
                symbol: 'X',
                position: 3
            }
        );
        // Lower case is not part of the alphabet.
        assert!("taat".parse::<QuadritSequence>().is_err());
    }

    #[test]
    fn invalid_utf8_reported() {
        let seq = encode(&[0xC3, 0x28]);
        assert_eq!(decode_to_string(&seq), Err(MalformedSequenceError::Utf8));
    }

    #[test]
    fn letters_match_symbols() {
        for b in [0x00u8, 0x1B, 0x7E, 0xFF] {
            let letters = byte_to_letters(b);
            let text = encode(&[b]).to_string();
            assert_eq!(letters.as_slice(), text.as_bytes());
        }
    }

    #[test]
    fn serde_uses_letter_string() {
        let seq = encode(b"hi");
        let json = serde_json::to_string(&seq).unwrap();
        assert_eq!(json, format!("\"{}\"", seq));
        let back: QuadritSequence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seq);
        assert!(serde_json::from_str::<QuadritSequence>("\"TAXT\"").is_err());
    }

    #[test]
    fn decode_str_helper() {
        assert_eq!(decode_str("TAATTAAC").unwrap(), b"AB");
    }
}
