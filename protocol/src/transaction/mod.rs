//! # Transaction Module
//!
//! Construction, validation, and intake of Helix transactions. Every value
//! transfer on the ledger is a [`Transaction`]: sender, recipient, amount,
//! timestamp, optional quadrit payload, metadata, and a Quadrit hash that
//! covers all of them.
//!
//! ## Architecture
//!
//! ```text
//! types.rs         Metadata, TransactionStatus, canonical byte helpers
//! builder.rs       Transaction and the fluent TransactionBuilder
//! verification.rs  Well-formedness checks and TransactionError
//! pool.rs          Arrival-ordered intake pool feeding RNA templates
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build**: [`TransactionBuilder`] assembles and validates the fields.
//! 2. **Submit**: the [`TransactionPool`] accepts it as pending.
//! 3. **Template**: a proposer reserves pending transactions into an RNA
//!    template (see [`crate::template`]).
//! 4. **Final**: once the block carrying that template reaches quorum, the
//!    transaction is persisted and pruned from the pool.
//!
//! ## Design Decisions
//!
//! - The hash is the identity. Resubmitting identical fields is a no-op.
//! - Amounts are `u64` in the smallest unit. No floating point anywhere near
//!   money.
//! - Metadata is a string map: opaque to the ledger, stable to hash, and
//!   friendly to both JSON and bincode.

pub mod builder;
pub mod pool;
pub mod types;
pub mod verification;

pub use builder::{Transaction, TransactionBuilder};
pub use pool::{PoolConfig, PoolError, SubmitOutcome, TransactionPool};
pub use types::{Metadata, TransactionStatus};
pub use verification::{validate_transaction, TransactionError};
