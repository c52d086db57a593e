//! # Storage Module
//!
//! Blocks and the persistence layer that holds the finalized chain.
//!
//! ## Architecture
//!
//! ```text
//! block.rs  Block, ChainTip, structural validity
//! chain.rs  Tip ownership, append, whole-chain integrity walk
//! db.rs     BlockStore trait, MemoryStore, sled-backed LedgerDb
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! RnaTemplate → candidate Block → (quorum) → Chain::append → BlockStore
//! ```
//!
//! Only finalized blocks reach a store. Candidates live in the finality
//! engine and are never persisted.
//!
//! ## Design Decisions
//!
//! 1. **Quadrit hash for everything.** Block hashes, template ids, and
//!    transaction hashes all come from `crypto::hash`.
//!
//! 2. **Bincode for on-disk values.** JSON is for the API; bincode is for
//!    sled.
//!
//! 3. **Append-only.** Stores refuse anything that does not extend their
//!    tip, so a bug upstream cannot rewrite history.

pub mod block;
pub mod chain;
pub mod db;

pub use block::{Block, BlockError, ChainTip};
pub use chain::{Chain, IntegrityError};
pub use db::{BlockStore, LedgerDb, MemoryStore, StorageError, StorageResult};
