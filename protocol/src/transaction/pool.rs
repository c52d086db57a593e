//! Arrival-ordered transaction intake pool.
//!
//! Thread-safe holding area for transactions waiting to be packed into an
//! RNA template. Transactions are indexed by hash for O(1) lookups and
//! ordered by arrival in a B-tree, so templates are filled first-come,
//! first-served. Per-sender tracking stops one sender from filling the pool.
//!
//! ## Lifecycle of an entry
//!
//! ```text
//!   submit ──► pending ──reserve──► reserved ──remove──► gone (finalized)
//!                 ▲                     │
//!                 └──────release────────┘   (candidate rejected)
//! ```
//!
//! Reserved transactions stay in the pool so validators can still resolve
//! the template's references while the candidate is being attested. They
//! are only dropped once their block is final.
//!
//! ## Design
//!
//! - `DashMap` for the hash index (hot path: duplicate checks and lookups
//!   from validators resolving template references).
//! - `parking_lot::RwLock<BTreeMap>` for the arrival index. Writers are
//!   submissions and prunes; readers are template builders.
//! - Per-sender timestamps are tracked but only warned about when they go
//!   backwards. Ordering between a sender's transactions is not enforced.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::builder::Transaction;
use super::verification::TransactionError;
use crate::config::{DEFAULT_POOL_MAX_PER_SENDER, DEFAULT_POOL_MAX_SIZE};
use crate::crypto::hash::QuadritDigest;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for pool behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of transactions the pool will hold, pending and
    /// reserved together.
    pub max_size: usize,

    /// Maximum transactions held per sender.
    pub max_per_sender: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_MAX_SIZE,
            max_per_sender: DEFAULT_POOL_MAX_PER_SENDER,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes & errors
// ---------------------------------------------------------------------------

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// New transaction, now pending.
    Accepted,
    /// Same hash is already in the pool. Nothing changed.
    Duplicate,
    /// Same hash is already in a finalized block. Nothing changed. Only the
    /// ledger reports this; the pool itself does not see finalized blocks.
    AlreadyFinal,
}

/// Reasons the pool refuses a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("malformed transaction: {0}")]
    Malformed(#[from] TransactionError),

    #[error("sender {sender} already has {limit} transactions in the pool")]
    SenderLimitExceeded { sender: String, limit: usize },

    #[error("pool is full ({size} transactions)")]
    PoolFull { size: usize },
}

// ---------------------------------------------------------------------------
// PoolEntry
// ---------------------------------------------------------------------------

/// A transaction together with pool bookkeeping.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub transaction: Transaction,
    /// Arrival sequence number. Lower arrived earlier.
    pub seq: u64,
    /// True while the transaction is referenced by an in-flight template.
    pub reserved: bool,
}

// ---------------------------------------------------------------------------
// TransactionPool
// ---------------------------------------------------------------------------

/// A thread-safe, arrival-ordered transaction pool.
pub struct TransactionPool {
    /// All held transactions by hash.
    transactions: DashMap<QuadritDigest, PoolEntry>,

    /// Arrival order: sequence number to hash.
    arrival_index: RwLock<BTreeMap<u64, QuadritDigest>>,

    /// Held transactions per sender.
    sender_counts: DashMap<String, usize>,

    /// Latest timestamp seen per sender, for the ordering warning.
    last_timestamp: DashMap<String, u64>,

    next_seq: AtomicU64,

    config: PoolConfig,
}

impl fmt::Debug for TransactionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionPool")
            .field("size", &self.transactions.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TransactionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            transactions: DashMap::new(),
            arrival_index: RwLock::new(BTreeMap::new()),
            sender_counts: DashMap::new(),
            last_timestamp: DashMap::new(),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Validates and adds a transaction.
    ///
    /// Checks, in order:
    ///
    /// 1. **Well-formed**: [`Transaction::validate`] must pass.
    /// 2. **Duplicate**: an identical hash is a no-op, not an error.
    /// 3. **Capacity**: reject if the pool is full. No eviction.
    /// 4. **Per-sender limit**: reject if the sender is at its cap.
    pub fn submit(&self, tx: Transaction) -> Result<SubmitOutcome, PoolError> {
        // 1. Well-formed.
        tx.validate()?;

        // 2. Duplicate check.
        let hash = tx.hash();
        if self.transactions.contains_key(&hash) {
            return Ok(SubmitOutcome::Duplicate);
        }

        // 3. Capacity. Checked before taking any entry lock: `len()` visits
        // every shard.
        if self.transactions.len() >= self.config.max_size {
            return Err(PoolError::PoolFull {
                size: self.config.max_size,
            });
        }

        // 4. Per-sender limit.
        let sender = tx.sender().to_string();
        {
            let mut count = self.sender_counts.entry(sender.clone()).or_insert(0);
            if *count >= self.config.max_per_sender {
                return Err(PoolError::SenderLimitExceeded {
                    sender,
                    limit: self.config.max_per_sender,
                });
            }
            *count += 1;
        }

        self.note_timestamp(&sender, tx.timestamp(), &hash);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.transactions.entry(hash) {
            Entry::Occupied(_) => {
                // Lost a race with an identical submission.
                self.decrement_sender_count(&sender);
                return Ok(SubmitOutcome::Duplicate);
            }
            Entry::Vacant(slot) => {
                slot.insert(PoolEntry {
                    transaction: tx,
                    seq,
                    reserved: false,
                });
            }
        }
        self.arrival_index.write().insert(seq, hash);

        debug!(tx = %hash.short(), sender = %sender, "transaction pooled");
        Ok(SubmitOutcome::Accepted)
    }

    /// Returns a clone of the transaction with the given hash, if held.
    pub fn get(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.transactions.get(hash).map(|e| e.transaction.clone())
    }

    pub fn contains(&self, hash: &QuadritDigest) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Marks up to `max_count` pending transactions as reserved and returns
    /// them, oldest first.
    pub fn reserve_pending(&self, max_count: usize) -> Vec<Transaction> {
        let index = self.arrival_index.read();
        let mut result = Vec::with_capacity(max_count.min(index.len()));

        for hash in index.values() {
            if result.len() >= max_count {
                break;
            }
            if let Some(mut entry) = self.transactions.get_mut(hash) {
                if !entry.reserved {
                    entry.reserved = true;
                    result.push(entry.transaction.clone());
                }
            }
        }

        result
    }

    /// Returns reserved transactions to pending, keeping their place in line.
    /// Unknown hashes are ignored.
    pub fn release(&self, hashes: &[QuadritDigest]) {
        for hash in hashes {
            if let Some(mut entry) = self.transactions.get_mut(hash) {
                entry.reserved = false;
            }
        }
    }

    /// Removes a transaction by hash and returns it.
    pub fn remove(&self, hash: &QuadritDigest) -> Option<Transaction> {
        let (_, entry) = self.transactions.remove(hash)?;
        self.arrival_index.write().remove(&entry.seq);
        self.decrement_sender_count(entry.transaction.sender());
        Some(entry.transaction)
    }

    /// Batch-removes transactions. Called after a block is finalized.
    /// Missing hashes are silently ignored.
    pub fn remove_batch(&self, hashes: &[QuadritDigest]) {
        for hash in hashes {
            self.remove(hash);
        }
    }

    /// Total held transactions, pending and reserved.
    pub fn size(&self) -> usize {
        self.transactions.len()
    }

    /// Transactions not yet reserved by a template.
    pub fn pending_count(&self) -> usize {
        self.transactions.iter().filter(|e| !e.reserved).count()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// All held transactions from `sender`, oldest first.
    pub fn pending_for_sender(&self, sender: &str) -> Vec<Transaction> {
        let mut found: Vec<(u64, Transaction)> = self
            .transactions
            .iter()
            .filter(|e| e.transaction.sender() == sender)
            .map(|e| (e.seq, e.transaction.clone()))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, tx)| tx).collect()
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn note_timestamp(&self, sender: &str, timestamp: u64, hash: &QuadritDigest) {
        let mut last = self.last_timestamp.entry(sender.to_string()).or_insert(0);
        if timestamp < *last {
            warn!(
                sender = %sender,
                tx = %hash.short(),
                timestamp,
                previous = *last,
                "sender timestamp went backwards"
            );
        } else {
            *last = timestamp;
        }
    }

    /// Decrements the sender's count, removing the entry at zero.
    fn decrement_sender_count(&self, sender: &str) {
        if let Some(mut count) = self.sender_counts.get_mut(sender) {
            if *count <= 1 {
                drop(count);
                self.sender_counts.remove(sender);
            } else {
                *count -= 1;
            }
        }
    }
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
