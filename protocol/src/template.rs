//! # RNA Templates
//!
//! An RNA template is a named, frozen batch of transaction references: the
//! unit a proposer hands to the finality engine. It carries hashes, not
//! transactions; whoever checks a template needs a [`TransactionResolver`]
//! that can turn those hashes back into transactions.
//!
//! ```text
//!   RnaTemplate {
//!       template_id   = QuadritHash(canonical bytes of everything below)
//!       proposer      who assembled the batch
//!       created_at    unix ms
//!       transactions  [tx hash, tx hash, ...]   ordered, no duplicates
//!       metadata      opaque string map
//!   }
//! ```
//!
//! A template may be empty. Whether an empty batch is worth proposing is the
//! batcher's call, not a validity rule.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_TEMPLATE_TRANSACTIONS, TEMPLATE_DOMAIN_TAG};
use crate::crypto::hash::{hash_bytes, QuadritDigest};
use crate::transaction::types::{put_bytes, put_digest, put_metadata, put_u64, validate_metadata};
use crate::transaction::{Metadata, Transaction, TransactionError, TransactionPool};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a template is not well formed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("transaction {0} is referenced more than once")]
    DuplicateReference(QuadritDigest),

    #[error("transaction {0} cannot be resolved")]
    DanglingReference(QuadritDigest),

    #[error("template references {count} transactions, more than {max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("template id mismatch: expected {expected}, got {actual}")]
    IdMismatch {
        expected: QuadritDigest,
        actual: QuadritDigest,
    },

    #[error("template metadata: {0}")]
    Metadata(#[from] TransactionError),
}

// ---------------------------------------------------------------------------
// TransactionResolver
// ---------------------------------------------------------------------------

/// Anything that can look up a transaction by hash.
///
/// The pool, a plain map, or a slice of transactions that came with a
/// proposal all qualify.
pub trait TransactionResolver {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction>;

    fn contains(&self, hash: &QuadritDigest) -> bool {
        self.resolve(hash).is_some()
    }
}

impl TransactionResolver for TransactionPool {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.get(hash)
    }

    fn contains(&self, hash: &QuadritDigest) -> bool {
        TransactionPool::contains(self, hash)
    }
}

impl TransactionResolver for HashMap<QuadritDigest, Transaction> {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.get(hash).cloned()
    }

    fn contains(&self, hash: &QuadritDigest) -> bool {
        self.contains_key(hash)
    }
}

impl TransactionResolver for BTreeMap<QuadritDigest, Transaction> {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.get(hash).cloned()
    }

    fn contains(&self, hash: &QuadritDigest) -> bool {
        self.contains_key(hash)
    }
}

impl TransactionResolver for [Transaction] {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.iter().find(|tx| tx.hash() == *hash).cloned()
    }
}

impl TransactionResolver for Vec<Transaction> {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.as_slice().resolve(hash)
    }
}

impl<T: TransactionResolver + ?Sized> TransactionResolver for &T {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        (**self).resolve(hash)
    }

    fn contains(&self, hash: &QuadritDigest) -> bool {
        (**self).contains(hash)
    }
}

// ---------------------------------------------------------------------------
// RnaTemplate
// ---------------------------------------------------------------------------

/// A frozen batch of transaction references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnaTemplate {
    template_id: QuadritDigest,
    proposer: String,
    /// Unix timestamp in milliseconds.
    created_at: u64,
    transactions: Vec<QuadritDigest>,
    #[serde(default)]
    metadata: Metadata,
}

impl RnaTemplate {
    /// Creates a template and computes its id. Does not check references;
    /// see [`RnaTemplate::validate`].
    pub fn new(
        proposer: impl Into<String>,
        created_at: u64,
        transactions: Vec<QuadritDigest>,
        metadata: Metadata,
    ) -> Self {
        let mut template = Self {
            template_id: QuadritDigest::ZERO,
            proposer: proposer.into(),
            created_at,
            transactions,
            metadata,
        };
        template.template_id = template.compute_id();
        template
    }

    /// Builds a template over `transactions`, in order, stamped now.
    pub fn from_transactions(proposer: impl Into<String>, transactions: &[Transaction]) -> Self {
        let created_at = Utc::now().timestamp_millis().max(0) as u64;
        Self::new(
            proposer,
            created_at,
            transactions.iter().map(Transaction::hash).collect(),
            Metadata::new(),
        )
    }

    pub fn template_id(&self) -> QuadritDigest {
        self.template_id
    }

    pub fn proposer(&self) -> &str {
        &self.proposer
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn transactions(&self) -> &[QuadritDigest] {
        &self.transactions
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// `TEMPLATE_DOMAIN_TAG | proposer | created_at | count | hashes | metadata`
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.transactions.len() * 32);
        buf.extend_from_slice(TEMPLATE_DOMAIN_TAG);
        put_bytes(&mut buf, self.proposer.as_bytes());
        put_u64(&mut buf, self.created_at);
        buf.extend_from_slice(&(self.transactions.len() as u32).to_le_bytes());
        for hash in &self.transactions {
            put_digest(&mut buf, hash);
        }
        put_metadata(&mut buf, &self.metadata);
        buf
    }

    pub fn compute_id(&self) -> QuadritDigest {
        hash_bytes(&self.canonical_bytes())
    }

    /// Well-formedness against `resolver`:
    ///
    /// - at most `MAX_TEMPLATE_TRANSACTIONS` references;
    /// - metadata within limits;
    /// - no hash referenced twice;
    /// - every hash resolvable;
    /// - `template_id` matches the recomputed id.
    pub fn validate<R: TransactionResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> Result<(), TemplateError> {
        if self.transactions.len() > MAX_TEMPLATE_TRANSACTIONS {
            return Err(TemplateError::TooManyTransactions {
                count: self.transactions.len(),
                max: MAX_TEMPLATE_TRANSACTIONS,
            });
        }

        validate_metadata(&self.metadata)?;

        let mut seen = HashSet::with_capacity(self.transactions.len());
        for hash in &self.transactions {
            if !seen.insert(*hash) {
                return Err(TemplateError::DuplicateReference(*hash));
            }
            if !resolver.contains(hash) {
                return Err(TemplateError::DanglingReference(*hash));
            }
        }

        let expected = self.compute_id();
        if expected != self.template_id {
            return Err(TemplateError::IdMismatch {
                expected,
                actual: self.template_id,
            });
        }

        Ok(())
    }

    /// `validate(resolver).is_ok()`.
    pub fn is_well_formed<R: TransactionResolver + ?Sized>(&self, resolver: &R) -> bool {
        self.validate(resolver).is_ok()
    }

    /// Resolves every reference, in order. `None` if any is missing.
    pub fn resolve_all<R: TransactionResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> Option<Vec<Transaction>> {
        self.transactions.iter().map(|h| resolver.resolve(h)).collect()
    }
}
