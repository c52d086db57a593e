//! # MQ Key Subsystem
//!
//! Key derivation for the Neo Seal: an Unbalanced Oil and Vinegar (UOV)
//! scheme over GF(16) with the `uov-Is` parameter set.
//!
//! ```text
//!   v = 96 vinegar variables, o = 64 oil variables
//!   n = v + o = 160 variables, m = 64 equations
//! ```
//!
//! ## Trapdoor
//!
//! The secret side is three things, all expanded from the seed with the
//! BLAKE3 XOF under [`MQ_KEY_EXPANSION_CONTEXT`]:
//!
//! - a 32-byte vinegar key, used to pick vinegar values while signing;
//! - the oil matrix `O` (v x o), which defines the secret linear map
//!   `T = [[I, O], [0, I]]`;
//! - the central map, one pair `(A_k, B_k)` per equation, where
//!   `F_k(y) = y_v^T A_k y_v + y_v^T B_k y_o` and `A_k` is upper triangular.
//!
//! The central map has no oil x oil terms. Fix the vinegar values and every
//! `F_k` becomes linear in the oil variables, which is the whole trick.
//!
//! ## Public System
//!
//! `P = F o T`. Expanding `F_k(T x)` with `y_v = x_v + O x_o` gives, per
//! equation, three blocks of a dense upper-triangular n x n matrix:
//!
//! ```text
//!   vinegar x vinegar : A_k
//!   vinegar x oil     : (A_k + A_k^T) O + B_k
//!   oil x oil         : upper fold of O^T (A_k O + B_k)
//! ```
//!
//! Coefficients are stored row by row, only `j >= i`, 12880 per equation.
//! `T` is its own inverse over a field of characteristic 2, which keeps the
//! signing side just as short.
//!
//! Derivation is deterministic and total: every byte string is a valid seed,
//! and the same seed always yields the same trapdoor and public system.

use std::fmt;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use super::gf16::{dot, pack, solve_square, unpack, Gf16};
use super::hash::{hash_bytes, QuadritDigest};
use crate::config::{
    MQ_COEFFS_PER_EQUATION, MQ_EQUATIONS, MQ_KEY_EXPANSION_CONTEXT, MQ_OIL_VARS,
    MQ_PARAMETER_SET, MQ_VARIABLES, MQ_VINEGAR_VARS,
};

const V: usize = MQ_VINEGAR_VARS;
const O: usize = MQ_OIL_VARS;
const N: usize = MQ_VARIABLES;
const M: usize = MQ_EQUATIONS;
const C: usize = MQ_COEFFS_PER_EQUATION;

// The oil system solved while signing is square.
const _: () = assert!(O == M);

/// Leading bytes of a serialized public system.
const PUBLIC_SYSTEM_MAGIC: &[u8; 4] = b"HXPS";

/// Serialization format version.
const PUBLIC_SYSTEM_VERSION: u8 = 1;

/// Length of the vinegar key in bytes.
const VINEGAR_KEY_LENGTH: usize = 32;

/// Errors raised when loading key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("public system truncated: {0} bytes")]
    Truncated(usize),

    #[error("not a serialized public system (bad magic)")]
    BadMagic,

    #[error("unsupported public system version {0}")]
    UnsupportedVersion(u8),

    #[error("parameter mismatch: expected {expected}, found {found}")]
    ParameterMismatch { expected: String, found: String },

    #[error("public system has {found} coefficient bytes, expected {expected}")]
    CoefficientLength { expected: usize, found: usize },
}

/// Position of coefficient `(i, j)`, `i <= j`, in one packed upper-triangular
/// equation.
#[inline]
const fn upper_index(i: usize, j: usize) -> usize {
    i * (2 * N - i + 1) / 2 + (j - i)
}

/// `split_at` that returns `None` instead of panicking on short input.
fn split_prefix(bytes: &[u8], at: usize) -> Option<(&[u8], &[u8])> {
    (bytes.len() >= at).then(|| bytes.split_at(at))
}

// ---------------------------------------------------------------------------
// XOF helper
// ---------------------------------------------------------------------------

/// Reads a BLAKE3 XOF as a stream of GF(16) elements, high nibble first.
struct NibbleStream {
    reader: blake3::OutputReader,
    buf: [u8; 64],
    pos: usize,
}

impl NibbleStream {
    fn new(reader: blake3::OutputReader) -> Self {
        Self {
            reader,
            buf: [0u8; 64],
            pos: 128,
        }
    }

    fn next_element(&mut self) -> Gf16 {
        if self.pos == 128 {
            self.reader.fill(&mut self.buf);
            self.pos = 0;
        }
        let byte = self.buf[self.pos / 2];
        let nibble = if self.pos % 2 == 0 { byte >> 4 } else { byte };
        self.pos += 1;
        Gf16::new(nibble)
    }

    fn take(&mut self, count: usize) -> Vec<Gf16> {
        (0..count).map(|_| self.next_element()).collect()
    }
}

// ---------------------------------------------------------------------------
// Trapdoor
// ---------------------------------------------------------------------------

/// One equation of the central map.
struct CentralEquation {
    /// v x v, row-major, zero below the diagonal.
    a: Vec<Gf16>,
    /// v x o, row-major.
    b: Vec<Gf16>,
}

/// The secret half of a key: oil matrix, central map, and vinegar key.
///
/// Never serialized and never logged. Rebuild it from the seed.
pub struct Trapdoor {
    /// v x o, row-major.
    oil: Vec<Gf16>,
    central: Vec<CentralEquation>,
    vinegar_key: [u8; VINEGAR_KEY_LENGTH],
}

impl Trapdoor {
    /// Expands a seed into a trapdoor.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(MQ_KEY_EXPANSION_CONTEXT);
        hasher.update(seed);
        let mut reader = hasher.finalize_xof();

        let mut vinegar_key = [0u8; VINEGAR_KEY_LENGTH];
        reader.fill(&mut vinegar_key);

        let mut stream = NibbleStream::new(reader);
        let oil = stream.take(V * O);

        let central = (0..M)
            .map(|_| {
                let mut a = vec![Gf16::ZERO; V * V];
                for i in 0..V {
                    for j in i..V {
                        a[i * V + j] = stream.next_element();
                    }
                }
                let b = stream.take(V * O);
                CentralEquation { a, b }
            })
            .collect();

        Self {
            oil,
            central,
            vinegar_key,
        }
    }

    /// Computes `P = F o T`.
    pub fn public_system(&self) -> PublicSystem {
        let mut coefficients = vec![Gf16::ZERO; M * C];

        for (k, eq) in self.central.iter().enumerate() {
            let out = &mut coefficients[k * C..(k + 1) * C];

            // vinegar x vinegar
            for i in 0..V {
                for j in i..V {
                    out[upper_index(i, j)] = eq.a[i * V + j];
                }
            }

            // A O + B, shared by the two remaining blocks.
            let mut aob = eq.b.clone();
            for i in 0..V {
                for r in i..V {
                    let a = eq.a[i * V + r];
                    if a.is_zero() {
                        continue;
                    }
                    for c in 0..O {
                        aob[i * O + c] += a * self.oil[r * O + c];
                    }
                }
            }

            // vinegar x oil: A O + A^T O + B
            let mut cross = aob.clone();
            for r in 0..V {
                for i in r..V {
                    let a = eq.a[r * V + i];
                    if a.is_zero() {
                        continue;
                    }
                    for c in 0..O {
                        cross[i * O + c] += a * self.oil[r * O + c];
                    }
                }
            }
            for i in 0..V {
                for c in 0..O {
                    out[upper_index(i, V + c)] = cross[i * O + c];
                }
            }

            // oil x oil: O^T (A O + B), folded onto the upper triangle.
            let mut full = vec![Gf16::ZERO; O * O];
            for i in 0..V {
                for a in 0..O {
                    let o = self.oil[i * O + a];
                    if o.is_zero() {
                        continue;
                    }
                    for b in 0..O {
                        full[a * O + b] += o * aob[i * O + b];
                    }
                }
            }
            for a in 0..O {
                out[upper_index(V + a, V + a)] = full[a * O + a];
                for b in (a + 1)..O {
                    out[upper_index(V + a, V + b)] = full[a * O + b] + full[b * O + a];
                }
            }
        }

        PublicSystem::from_coefficients(coefficients)
    }

    /// Vinegar values for a target, derived with keyed BLAKE3 so the same
    /// target always picks the same vinegar.
    fn vinegar_for(&self, target: &[Gf16]) -> Vec<Gf16> {
        let mut hasher = blake3::Hasher::new_keyed(&self.vinegar_key);
        hasher.update(&pack(target));
        NibbleStream::new(hasher.finalize_xof()).take(V)
    }

    /// Finds `x` with `P(x) = target`, or `None` if the oil system for this
    /// target's vinegar is singular.
    ///
    /// `target` must hold exactly m elements.
    pub(crate) fn invert(&self, target: &[Gf16]) -> Option<Vec<Gf16>> {
        if target.len() != M {
            return None;
        }
        let vinegar = self.vinegar_for(target);

        let mut linear = vec![Gf16::ZERO; M * O];
        let mut rhs = vec![Gf16::ZERO; M];

        for (k, eq) in self.central.iter().enumerate() {
            let mut constant = Gf16::ZERO;
            for i in 0..V {
                if vinegar[i].is_zero() {
                    continue;
                }
                let acc = dot(&eq.a[i * V + i..(i + 1) * V], &vinegar[i..]);
                constant += vinegar[i] * acc;

                for c in 0..O {
                    linear[k * O + c] += vinegar[i] * eq.b[i * O + c];
                }
            }
            rhs[k] = target[k] + constant;
        }

        let oil_values = solve_square(linear, rhs, O)?;

        let mut x = Vec::with_capacity(N);
        for i in 0..V {
            let shift = dot(&self.oil[i * O..(i + 1) * O], &oil_values);
            x.push(vinegar[i] + shift);
        }
        x.extend_from_slice(&oil_values);
        Some(x)
    }
}

impl fmt::Debug for Trapdoor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trapdoor(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// PublicSystem
// ---------------------------------------------------------------------------

/// The public half of a key: m homogeneous quadratic equations in n
/// variables over GF(16).
///
/// Deliberately not `Serialize`: it is large (about 400 KiB packed), so
/// callers pass it around as `Arc<PublicSystem>` and move it over the wire or
/// to disk with explicit [`to_bytes`](Self::to_bytes) /
/// [`from_bytes`](Self::from_bytes). Everything else refers to a key by its
/// [`fingerprint`](Self::fingerprint).
pub struct PublicSystem {
    /// m equations of C coefficients each.
    coefficients: Vec<Gf16>,
    fingerprint: QuadritDigest,
}

impl PublicSystem {
    fn from_coefficients(coefficients: Vec<Gf16>) -> Self {
        let fingerprint = hash_bytes(&Self::encode(&coefficients));
        Self {
            coefficients,
            fingerprint,
        }
    }

    /// Quadrit hash of the serialized system. Used as the key's identity.
    pub fn fingerprint(&self) -> QuadritDigest {
        self.fingerprint
    }

    pub fn num_variables(&self) -> usize {
        N
    }

    pub fn num_equations(&self) -> usize {
        M
    }

    /// Coefficient of `x_i x_j` in equation `k` (order of `i`, `j` does not
    /// matter). Returns `None` when out of range.
    pub fn coefficient(&self, k: usize, i: usize, j: usize) -> Option<Gf16> {
        if k >= M || i >= N || j >= N {
            return None;
        }
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        Some(self.coefficients[k * C + upper_index(i, j)])
    }

    /// Evaluates every equation at `x`. `None` if `x` is not n elements long.
    pub fn evaluate(&self, x: &[Gf16]) -> Option<Vec<Gf16>> {
        if x.len() != N {
            return None;
        }

        let out = self
            .coefficients
            .chunks_exact(C)
            .map(|eq| {
                let mut value = Gf16::ZERO;
                let mut offset = 0;
                for i in 0..N {
                    let row = &eq[offset..offset + (N - i)];
                    offset += N - i;
                    if x[i].is_zero() {
                        continue;
                    }
                    value += x[i] * dot(row, &x[i..]);
                }
                value
            })
            .collect();
        Some(out)
    }

    fn encode(coefficients: &[Gf16]) -> Vec<u8> {
        let name = MQ_PARAMETER_SET.as_bytes();
        let mut buf = Vec::with_capacity(4 + 1 + 1 + name.len() + 4 + coefficients.len() / 2);
        buf.extend_from_slice(PUBLIC_SYSTEM_MAGIC);
        buf.push(PUBLIC_SYSTEM_VERSION);
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);
        buf.extend_from_slice(&(N as u16).to_be_bytes());
        buf.extend_from_slice(&(M as u16).to_be_bytes());
        buf.extend_from_slice(&pack(coefficients));
        buf
    }

    /// Serializes to `magic | version | parameter set | n | m | coefficients`,
    /// coefficients packed two per byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        Self::encode(&self.coefficients)
    }

    /// Parses the output of [`to_bytes`](Self::to_bytes), rejecting anything
    /// built for a different parameter set.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let truncated = || KeyError::Truncated(bytes.len());

        let (magic, rest) = split_prefix(bytes, 4).ok_or_else(truncated)?;
        if magic != PUBLIC_SYSTEM_MAGIC {
            return Err(KeyError::BadMagic);
        }

        let (&version, rest) = rest.split_first().ok_or_else(truncated)?;
        if version != PUBLIC_SYSTEM_VERSION {
            return Err(KeyError::UnsupportedVersion(version));
        }

        let (&name_len, rest) = rest.split_first().ok_or_else(truncated)?;
        let (name, rest) = split_prefix(rest, name_len as usize).ok_or_else(truncated)?;
        if name != MQ_PARAMETER_SET.as_bytes() {
            return Err(KeyError::ParameterMismatch {
                expected: MQ_PARAMETER_SET.to_string(),
                found: String::from_utf8_lossy(name).into_owned(),
            });
        }

        let (dims, packed) = split_prefix(rest, 4).ok_or_else(truncated)?;
        let n = u16::from_be_bytes([dims[0], dims[1]]) as usize;
        let m = u16::from_be_bytes([dims[2], dims[3]]) as usize;
        if n != N || m != M {
            return Err(KeyError::ParameterMismatch {
                expected: format!("n={N}, m={M}"),
                found: format!("n={n}, m={m}"),
            });
        }

        let expected = M * C / 2;
        if packed.len() != expected {
            return Err(KeyError::CoefficientLength {
                expected,
                found: packed.len(),
            });
        }

        Ok(Self::from_coefficients(unpack(packed)))
    }
}

impl fmt::Debug for PublicSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicSystem")
            .field("parameter_set", &MQ_PARAMETER_SET)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl PartialEq for PublicSystem {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.coefficients == other.coefficients
    }
}

impl Eq for PublicSystem {}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// Seed, trapdoor, and public system of one Neo Seal identity.
///
/// Like the trapdoor, a keypair is never serialized. Persist the seed and
/// call [`derive_keypair`] again.
pub struct KeyPair {
    seed: Vec<u8>,
    trapdoor: Trapdoor,
    public: Arc<PublicSystem>,
}

impl KeyPair {
    /// Derives a keypair from 32 bytes of OS randomness.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        derive_keypair(&seed)
    }

    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    pub fn trapdoor(&self) -> &Trapdoor {
        &self.trapdoor
    }

    pub fn public_system(&self) -> &Arc<PublicSystem> {
        &self.public
    }

    /// Shortcut for `public_system().fingerprint()`.
    pub fn fingerprint(&self) -> QuadritDigest {
        self.public.fingerprint()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.public.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Derives a keypair from a seed. Deterministic and total.
///
/// This is the expensive operation of the module (tens of millions of field
/// multiplications). Derive once and keep the result.
pub fn derive_keypair(seed: &[u8]) -> KeyPair {
    let trapdoor = Trapdoor::from_seed(seed);
    let public = Arc::new(trapdoor.public_system());
    debug!(fingerprint = %public.fingerprint().short(), "derived Neo Seal keypair");
    KeyPair {
        seed: seed.to_vec(),
        trapdoor,
        public,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn keypair() -> &'static KeyPair {
        static KP: OnceLock<KeyPair> = OnceLock::new();
        KP.get_or_init(|| derive_keypair(b"mq unit test seed"))
    }

    #[test]
    fn upper_index_layout() {
        assert_eq!(upper_index(0, 0), 0);
        assert_eq!(upper_index(0, N - 1), N - 1);
        assert_eq!(upper_index(1, 1), N);
        assert_eq!(upper_index(N - 1, N - 1), C - 1);
    }

    #[test]
    fn derivation_is_deterministic() {
        let again = derive_keypair(b"mq unit test seed");
        assert_eq!(again.fingerprint(), keypair().fingerprint());
        assert_eq!(again.public_system().as_ref(), keypair().public_system().as_ref());
    }

    #[test]
    fn different_seeds_give_different_keys() {
        let other = derive_keypair(b"another seed");
        assert_ne!(other.fingerprint(), keypair().fingerprint());
    }

    #[test]
    fn empty_seed_is_accepted() {
        let kp = derive_keypair(b"");
        assert_eq!(kp.public_system().num_variables(), 160);
    }

    #[test]
    fn inversion_satisfies_public_system() {
        let kp = keypair();
        let mut found = 0;
        for t in 0..8u8 {
            let target: Vec<Gf16> = (0..M).map(|i| Gf16::new(t.wrapping_mul(7) ^ i as u8)).collect();
            if let Some(x) = kp.trapdoor().invert(&target) {
                assert_eq!(kp.public_system().evaluate(&x).unwrap(), target);
                found += 1;
            }
        }
        // Each attempt fails with probability about 1/16.
        assert!(found >= 4);
    }

    #[test]
    fn public_system_vanishes_on_oil_space() {
        // Vectors of the form T^-1 (0, y_o) have zero vinegar in the central
        // map, so every equation evaluates to zero there.
        let kp = keypair();
        let y_o: Vec<Gf16> = (0..O).map(|i| Gf16::new(i as u8 * 3 + 1)).collect();
        let mut x = Vec::with_capacity(N);
        for i in 0..V {
            x.push(dot(&kp.trapdoor().oil[i * O..(i + 1) * O], &y_o));
        }
        x.extend_from_slice(&y_o);
        let values = kp.public_system().evaluate(&x).unwrap();
        assert!(values.iter().all(|v| v.is_zero()));
    }

    #[test]
    fn evaluate_rejects_wrong_length() {
        assert!(keypair().public_system().evaluate(&[Gf16::ONE; 3]).is_none());
        assert!(keypair().trapdoor().invert(&[Gf16::ONE; 3]).is_none());
    }

    #[test]
    fn bytes_round_trip() {
        let ps = keypair().public_system();
        let bytes = ps.to_bytes();
        let back = PublicSystem::from_bytes(&bytes).unwrap();
        assert_eq!(&back, ps.as_ref());
        assert_eq!(back.fingerprint(), ps.fingerprint());
        assert_eq!(hash_bytes(&bytes), ps.fingerprint());
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        let bytes = keypair().public_system().to_bytes();

        assert_eq!(PublicSystem::from_bytes(&bytes[..2]), Err(KeyError::Truncated(2)));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(PublicSystem::from_bytes(&bad_magic), Err(KeyError::BadMagic));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert_eq!(
            PublicSystem::from_bytes(&bad_version),
            Err(KeyError::UnsupportedVersion(9))
        );

        let short = &bytes[..bytes.len() - 1];
        assert!(matches!(
            PublicSystem::from_bytes(short),
            Err(KeyError::CoefficientLength { .. })
        ));
    }

    #[test]
    fn coefficient_is_symmetric_in_indices() {
        let ps = keypair().public_system();
        assert_eq!(ps.coefficient(3, 10, 150), ps.coefficient(3, 150, 10));
        assert_eq!(ps.coefficient(M, 0, 0), None);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let s = format!("{:?}", keypair());
        assert!(s.contains("fingerprint"));
        assert_eq!(format!("{:?}", keypair().trapdoor()), "Trapdoor(<redacted>)");
    }
}
