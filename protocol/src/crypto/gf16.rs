//! # GF(16) Arithmetic
//!
//! The field the Neo Seal lives in: polynomials over GF(2) modulo
//! `x^4 + x + 1`, one element per nibble. Addition is XOR, multiplication is a
//! table lookup into a 16x16 table built at compile time.
//!
//! Two quadrits make one element (`hi << 2 | lo`), two elements make one
//! byte. A digest therefore reads as 64 elements, which is exactly the number
//! of equations in the public system.
//!
//! Also home to the small amount of linear algebra signing needs: a Gaussian
//! elimination over a square system.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Sub};

use serde::{Deserialize, Serialize};

use super::hash::QuadritDigest;
use super::quadrit::Quadrit;
use crate::config::{DIGEST_NIBBLES, GF16_MODULUS};

/// Raised when a byte outside `0..16` is offered as a field element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a GF(16) element")]
pub struct InvalidElement(pub u8);

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Carry-less multiply then reduce. Only used to build [`MUL_TABLE`].
const fn mul_slow(a: u8, b: u8) -> u8 {
    let mut acc: u8 = 0;
    let mut a = a;
    let mut i = 0;
    while i < 4 {
        if (b >> i) & 1 == 1 {
            acc ^= a;
        }
        a <<= 1;
        if a & 0x10 != 0 {
            a ^= GF16_MODULUS;
        }
        i += 1;
    }
    acc
}

const fn build_mul_table() -> [[u8; 16]; 16] {
    let mut table = [[0u8; 16]; 16];
    let mut a = 0;
    while a < 16 {
        let mut b = 0;
        while b < 16 {
            table[a][b] = mul_slow(a as u8, b as u8);
            b += 1;
        }
        a += 1;
    }
    table
}

const fn build_inv_table() -> [u8; 16] {
    let mut inv = [0u8; 16];
    let mut a = 1;
    while a < 16 {
        let mut b = 1;
        while b < 16 {
            if mul_slow(a as u8, b as u8) == 1 {
                inv[a] = b as u8;
            }
            b += 1;
        }
        a += 1;
    }
    inv
}

static MUL_TABLE: [[u8; 16]; 16] = build_mul_table();
static INV_TABLE: [u8; 16] = build_inv_table();

// ---------------------------------------------------------------------------
// Gf16
// ---------------------------------------------------------------------------

/// One element of GF(16). The inner value is always `< 16`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Gf16(u8);

impl Gf16 {
    pub const ZERO: Gf16 = Gf16(0);
    pub const ONE: Gf16 = Gf16(1);

    /// Builds an element from the low nibble of `v`.
    pub const fn new(v: u8) -> Self {
        Gf16(v & 0x0F)
    }

    /// Two quadrits, high one first.
    pub const fn from_quadrits(hi: Quadrit, lo: Quadrit) -> Self {
        Gf16((hi.bits() << 2) | lo.bits())
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiplicative inverse, `None` for zero.
    pub fn inv(self) -> Option<Gf16> {
        if self.0 == 0 {
            None
        } else {
            Some(Gf16(INV_TABLE[self.0 as usize]))
        }
    }
}

impl fmt::Debug for Gf16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Gf16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl TryFrom<u8> for Gf16 {
    type Error = InvalidElement;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        if v < 16 {
            Ok(Gf16(v))
        } else {
            Err(InvalidElement(v))
        }
    }
}

impl From<Gf16> for u8 {
    fn from(e: Gf16) -> u8 {
        e.0
    }
}

impl Add for Gf16 {
    type Output = Gf16;

    #[inline]
    fn add(self, rhs: Gf16) -> Gf16 {
        Gf16(self.0 ^ rhs.0)
    }
}

// Characteristic 2: subtraction is addition.
impl Sub for Gf16 {
    type Output = Gf16;

    #[inline]
    fn sub(self, rhs: Gf16) -> Gf16 {
        Gf16(self.0 ^ rhs.0)
    }
}

impl AddAssign for Gf16 {
    #[inline]
    fn add_assign(&mut self, rhs: Gf16) {
        self.0 ^= rhs.0;
    }
}

impl Mul for Gf16 {
    type Output = Gf16;

    #[inline]
    fn mul(self, rhs: Gf16) -> Gf16 {
        Gf16(MUL_TABLE[self.0 as usize][rhs.0 as usize])
    }
}

impl MulAssign for Gf16 {
    #[inline]
    fn mul_assign(&mut self, rhs: Gf16) {
        *self = *self * rhs;
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// A digest as 64 field elements, high nibble of each byte first.
pub fn digest_to_elements(digest: &QuadritDigest) -> [Gf16; DIGEST_NIBBLES] {
    let nibbles = digest.to_nibbles();
    let mut out = [Gf16::ZERO; DIGEST_NIBBLES];
    for (slot, n) in out.iter_mut().zip(nibbles) {
        *slot = Gf16(n);
    }
    out
}

/// Packs elements two per byte, high nibble first. An odd count leaves the
/// final low nibble zero.
pub fn pack(elements: &[Gf16]) -> Vec<u8> {
    elements
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].0 << 4;
            let lo = pair.get(1).map_or(0, |e| e.0);
            hi | lo
        })
        .collect()
}

/// Inverse of [`pack`]; yields `2 * bytes.len()` elements.
pub fn unpack(bytes: &[u8]) -> Vec<Gf16> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(Gf16(b >> 4));
        out.push(Gf16(b & 0x0F));
    }
    out
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[Gf16], b: &[Gf16]) -> Gf16 {
    a.iter().zip(b).fold(Gf16::ZERO, |acc, (&x, &y)| acc + x * y)
}

// ---------------------------------------------------------------------------
// Linear Systems
// ---------------------------------------------------------------------------

/// Solves `A x = b` for square `A` (row-major, `n * n` entries).
///
/// Gauss-Jordan with partial pivoting on the first non-zero entry. Returns
/// `None` when `A` is singular; there is no least-squares fallback.
pub fn solve_square(mut a: Vec<Gf16>, mut b: Vec<Gf16>, n: usize) -> Option<Vec<Gf16>> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);

    for col in 0..n {
        let pivot = (col..n).find(|&r| !a[r * n + col].is_zero())?;
        if pivot != col {
            for k in 0..n {
                a.swap(pivot * n + k, col * n + k);
            }
            b.swap(pivot, col);
        }

        let inv = a[col * n + col].inv()?;
        for k in col..n {
            a[col * n + k] *= inv;
        }
        b[col] *= inv;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor.is_zero() {
                continue;
            }
            for k in col..n {
                let v = a[col * n + k];
                a[row * n + k] += factor * v;
            }
            let v = b[col];
            b[row] += factor * v;
        }
    }

    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> impl Iterator<Item = Gf16> {
        (0..16).map(Gf16)
    }

    #[test]
    fn multiplication_is_a_field() {
        for a in all() {
            assert_eq!(a * Gf16::ONE, a);
            assert_eq!(a * Gf16::ZERO, Gf16::ZERO);
            for b in all() {
                assert_eq!(a * b, b * a);
                for c in all() {
                    assert_eq!(a * (b + c), a * b + a * c);
                    assert_eq!((a * b) * c, a * (b * c));
                }
            }
        }
    }

    #[test]
    fn tables_match_direct_arithmetic() {
        for a in 0..16u8 {
            for b in 0..16u8 {
                assert_eq!(MUL_TABLE[a as usize][b as usize], mul_slow(a, b));
            }
            if a != 0 {
                assert_eq!(mul_slow(a, INV_TABLE[a as usize]), 1);
            }
        }
    }

    #[test]
    fn inverses() {
        assert_eq!(Gf16::ZERO.inv(), None);
        for a in all().skip(1) {
            let inv = a.inv().unwrap();
            assert_eq!(a * inv, Gf16::ONE);
        }
    }

    #[test]
    fn reduction_polynomial() {
        // x * x^3 = x^4 = x + 1
        assert_eq!(Gf16(0b0010) * Gf16(0b1000), Gf16(0b0011));
    }

    #[test]
    fn addition_is_self_inverse() {
        for a in all() {
            assert_eq!(a + a, Gf16::ZERO);
            assert_eq!(a - a, Gf16::ZERO);
        }
    }

    #[test]
    fn strict_conversion_from_u8() {
        assert_eq!(Gf16::try_from(15u8), Ok(Gf16(15)));
        assert_eq!(Gf16::try_from(16u8), Err(InvalidElement(16)));
        assert!(serde_json::from_str::<Gf16>("200").is_err());
        assert_eq!(serde_json::from_str::<Gf16>("7").unwrap(), Gf16(7));
    }

    #[test]
    fn quadrit_pairs() {
        assert_eq!(Gf16::from_quadrits(Quadrit::G, Quadrit::T), Gf16(0b1101));
        assert_eq!(Gf16::from_quadrits(Quadrit::A, Quadrit::A), Gf16::ZERO);
    }

    #[test]
    fn pack_unpack() {
        let elems: Vec<Gf16> = (0..16).map(Gf16).collect();
        let packed = pack(&elems);
        assert_eq!(packed.len(), 8);
        assert_eq!(packed[0], 0x01);
        assert_eq!(unpack(&packed), elems);
    }

    #[test]
    fn digest_elements_follow_nibbles() {
        let d = QuadritDigest::from_bytes([0x3C; 32]);
        let e = digest_to_elements(&d);
        assert_eq!(e[0], Gf16(3));
        assert_eq!(e[1], Gf16(0xC));
    }

    #[test]
    fn solves_invertible_system() {
        // A = [[1, 2], [3, 4]], x = [5, 6]
        let a = vec![Gf16(1), Gf16(2), Gf16(3), Gf16(4)];
        let x = [Gf16(5), Gf16(6)];
        let b = vec![
            Gf16(1) * x[0] + Gf16(2) * x[1],
            Gf16(3) * x[0] + Gf16(4) * x[1],
        ];
        assert_eq!(solve_square(a, b, 2).unwrap(), x.to_vec());
    }

    #[test]
    fn singular_system_has_no_solution() {
        // Second row is twice the first (multiplying by 2 in GF(16)).
        let a = vec![Gf16(1), Gf16(3), Gf16(2), Gf16(2) * Gf16(3)];
        let b = vec![Gf16(1), Gf16(1)];
        assert_eq!(solve_square(a, b, 2), None);
    }

    #[test]
    fn needs_row_swap() {
        let a = vec![Gf16(0), Gf16(1), Gf16(1), Gf16(0)];
        let b = vec![Gf16(7), Gf16(9)];
        assert_eq!(solve_square(a, b, 2).unwrap(), vec![Gf16(9), Gf16(7)]);
    }
}
