// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Helix Protocol: Core Library
//!
//! A ledger whose data lives in a four-letter alphabet and whose blocks are
//! made final by a post-quantum signature quorum.
//!
//! Every byte the ledger hashes is first spelled out in quadrits (A, T, C,
//! G: two bits each). Blocks are sealed by validators with Neo Seal, a
//! multivariate-quadratic signature over GF(16), and a block is final once
//! the attesting validators carry more than two thirds of the weight.
//!
//! ## Architecture
//!
//! - **crypto**: quadrit codec, Quadrit hash, GF(16), MQ keys, Neo Seal.
//! - **transaction**: transactions, validation, and the intake pool.
//! - **template**: RNA templates, the batches a proposer hands to consensus.
//! - **storage**: blocks, the chain tip, and the block stores.
//! - **consensus**: CIP attestations, validator sets, the finality engine.
//! - **ledger**: the facade that wires all of the above together.
//! - **config**: protocol constants.
//!
//! ## Design Philosophy
//!
//! 1. Finalized state is never touched. A bad input rejects one transition.
//! 2. Verification answers `bool`. Callers don't get to learn which check
//!    failed, and neither does an attacker.
//! 3. No unsafe code. No floating point anywhere near money.
//! 4. If it touches finality, it has tests. Plural.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod ledger;
pub mod storage;
pub mod template;
pub mod transaction;

pub use ledger::{Ledger, LedgerError, LedgerResult};
