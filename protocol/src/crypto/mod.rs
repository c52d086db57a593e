//! # Cryptographic Primitives for Helix
//!
//! Everything the ledger needs to encode, hash, and seal data:
//!
//! - **quadrit**: the A/T/C/G byte encoding every digest is defined over.
//! - **hash**: the Quadrit hash (BLAKE3 `derive_key` over quadrit letters).
//! - **gf16**: GF(16) arithmetic for the MQ signature.
//! - **mq**: UOV key derivation: seed to trapdoor to public system.
//! - **seal**: Neo Seal signing and verification.
//!
//! ## A note on "rolling your own crypto"
//!
//! The hash is BLAKE3 with a context string; we add an encoding, not a
//! primitive. The seal is textbook UOV with published parameters. If you're
//! tempted to tweak either, don't. Changing a single constant forks the chain.

pub mod gf16;
pub mod hash;
pub mod mq;
pub mod quadrit;
pub mod seal;

pub use gf16::Gf16;
pub use hash::{hash_bytes, hash_parts, quadrit_hash, QuadritDigest, QuadritHasher};
pub use mq::{derive_keypair, KeyError, KeyPair, PublicSystem, Trapdoor};
pub use quadrit::{decode, encode, MalformedSequenceError, Quadrit, QuadritSequence};
pub use seal::{sign, sign_target, verify, NeoSeal, SealError};
