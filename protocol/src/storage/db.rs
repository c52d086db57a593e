//! # Block Stores
//!
//! The persistence layer for finalized blocks. Everything that has reached
//! quorum flows through a [`BlockStore`]; candidates never do.
//!
//! Two backends:
//!
//! - [`MemoryStore`]: a `parking_lot::RwLock` over plain maps. Tests and
//!   throwaway devnets.
//! - [`LedgerDb`]: sled's embedded key-value store.
//!
//! ## Tree Layout (`LedgerDb`)
//!
//! | Tree           | Key                   | Value                  |
//! |----------------|-----------------------|------------------------|
//! | `blocks`       | `block_hash` (32B)    | `bincode(Block)`       |
//! | `block_ids`    | `block_id` (8B BE)    | `block_hash` (32B)     |
//! | `transactions` | `tx hash` (32B)       | `bincode(Transaction)` |
//! | `metadata`     | key (UTF-8)           | `bincode(ChainTip)`    |
//!
//! Block ids are stored big-endian so sled's lexicographic order matches
//! numeric order.
//!
//! ## Atomicity
//!
//! Appending a block writes the block, its id index entry, every transaction
//! it carries, and the new tip in a single multi-tree sled transaction.
//! Either all of it lands or none of it does.
//!
//! ## Append-Only
//!
//! Both backends refuse a block that does not extend their current tip.
//! Nothing is ever overwritten or deleted.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use sled::transaction::TransactionError as SledTransactionError;
use sled::{Db, Transactional, Tree};
use thiserror::Error;
use tracing::debug;

use super::block::{Block, ChainTip};
use crate::crypto::hash::QuadritDigest;
use crate::template::TransactionResolver;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("block {actual} does not follow tip position {expected}")]
    OutOfOrder { expected: u64, actual: u64 },

    #[error("block extends {actual}, store tip is {expected}")]
    BrokenLink {
        expected: QuadritDigest,
        actual: QuadritDigest,
    },

    #[error("transaction {hash} referenced by block {block_id} was not supplied")]
    MissingTransaction { block_id: u64, hash: QuadritDigest },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// BlockStore
// ---------------------------------------------------------------------------

/// Append-only storage for finalized blocks and their transactions.
pub trait BlockStore: Send + Sync {
    /// Appends `block`, which must extend [`BlockStore::tip`], together with
    /// the transactions its template references.
    fn append(&self, block: &Block, transactions: &[Transaction]) -> StorageResult<()>;

    fn block(&self, block_id: u64) -> StorageResult<Option<Block>>;

    fn block_by_hash(&self, hash: &QuadritDigest) -> StorageResult<Option<Block>>;

    fn transaction(&self, hash: &QuadritDigest) -> StorageResult<Option<Transaction>>;

    fn contains_block(&self, hash: &QuadritDigest) -> StorageResult<bool>;

    fn contains_transaction(&self, hash: &QuadritDigest) -> StorageResult<bool>;

    fn tip(&self) -> StorageResult<ChainTip>;

    fn block_count(&self) -> usize;

    fn transaction_count(&self) -> usize;

    /// Forces pending writes to durable storage. A no-op in memory.
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Finalized transactions are resolvable. Storage errors resolve to `None`.
impl<'a> TransactionResolver for dyn BlockStore + 'a {
    fn resolve(&self, hash: &QuadritDigest) -> Option<Transaction> {
        self.transaction(hash).ok().flatten()
    }

    fn contains(&self, hash: &QuadritDigest) -> bool {
        self.contains_transaction(hash).unwrap_or(false)
    }
}

/// Shared precondition of every `append`: position, link, and payload.
fn check_append(tip: &ChainTip, block: &Block, transactions: &[Transaction]) -> StorageResult<()> {
    if block.block_id() != tip.next_block_id {
        return Err(StorageError::OutOfOrder {
            expected: tip.next_block_id,
            actual: block.block_id(),
        });
    }
    if block.previous_block_hash() != tip.tip_hash {
        return Err(StorageError::BrokenLink {
            expected: tip.tip_hash,
            actual: block.previous_block_hash(),
        });
    }
    for hash in block.transaction_hashes() {
        if !transactions.iter().any(|tx| tx.hash() == *hash) {
            return Err(StorageError::MissingTransaction {
                block_id: block.block_id(),
                hash: *hash,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: Vec<Block>,
    by_hash: HashMap<QuadritDigest, u64>,
    transactions: HashMap<QuadritDigest, Transaction>,
}

/// In-memory [`BlockStore`]. Lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryStore {
    fn append(&self, block: &Block, transactions: &[Transaction]) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let tip = match inner.blocks.last() {
            Some(last) => ChainTip::after(last),
            None => ChainTip::GENESIS,
        };
        check_append(&tip, block, transactions)?;

        for hash in block.transaction_hashes() {
            if let Some(tx) = transactions.iter().find(|tx| tx.hash() == *hash) {
                inner.transactions.insert(*hash, tx.clone());
            }
        }
        inner.by_hash.insert(block.block_hash(), block.block_id());
        inner.blocks.push(block.clone());
        Ok(())
    }

    fn block(&self, block_id: u64) -> StorageResult<Option<Block>> {
        let inner = self.inner.read();
        Ok(usize::try_from(block_id)
            .ok()
            .and_then(|i| inner.blocks.get(i))
            .cloned())
    }

    fn block_by_hash(&self, hash: &QuadritDigest) -> StorageResult<Option<Block>> {
        let inner = self.inner.read();
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|id| inner.blocks.get(*id as usize))
            .cloned())
    }

    fn transaction(&self, hash: &QuadritDigest) -> StorageResult<Option<Transaction>> {
        Ok(self.inner.read().transactions.get(hash).cloned())
    }

    fn contains_block(&self, hash: &QuadritDigest) -> StorageResult<bool> {
        Ok(self.inner.read().by_hash.contains_key(hash))
    }

    fn contains_transaction(&self, hash: &QuadritDigest) -> StorageResult<bool> {
        Ok(self.inner.read().transactions.contains_key(hash))
    }

    fn tip(&self) -> StorageResult<ChainTip> {
        Ok(match self.inner.read().blocks.last() {
            Some(last) => ChainTip::after(last),
            None => ChainTip::GENESIS,
        })
    }

    fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    fn transaction_count(&self) -> usize {
        self.inner.read().transactions.len()
    }
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Well-known key in the `metadata` tree for the chain tip.
const META_TIP: &[u8] = b"chain_tip";

/// sled-backed [`BlockStore`].
///
/// sled trees are safe for concurrent reads and serialize writes, so a
/// `LedgerDb` can be shared behind an `Arc` without extra locking. Appends
/// are additionally serialized by `append_lock` so the tip check and the
/// write cannot interleave with another append.
#[derive(Debug)]
pub struct LedgerDb {
    db: Db,
    blocks: Tree,
    block_ids: Tree,
    transactions: Tree,
    metadata: Tree,
    append_lock: parking_lot::Mutex<()>,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in a temporary directory and is removed when
    /// dropped.
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let store = Self {
            blocks: db.open_tree("blocks")?,
            block_ids: db.open_tree("block_ids")?,
            transactions: db.open_tree("transactions")?,
            metadata: db.open_tree("metadata")?,
            db,
            append_lock: parking_lot::Mutex::new(()),
        };
        let tip = store.tip()?;
        debug!(tip = %tip, blocks = store.blocks.len(), "ledger db opened");
        Ok(store)
    }

    fn decode_block(bytes: &[u8]) -> StorageResult<Block> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl BlockStore for LedgerDb {
    fn append(&self, block: &Block, transactions: &[Transaction]) -> StorageResult<()> {
        let _guard = self.append_lock.lock();
        let tip = self.tip()?;
        check_append(&tip, block, transactions)?;

        let hash_key = *block.block_hash().as_bytes();
        let id_key = block.block_id().to_be_bytes();
        let block_bytes = bincode::serialize(block)?;
        let tip_bytes = bincode::serialize(&ChainTip::after(block))?;
        let mut tx_rows = Vec::with_capacity(block.transaction_hashes().len());
        for hash in block.transaction_hashes() {
            if let Some(tx) = transactions.iter().find(|tx| tx.hash() == *hash) {
                tx_rows.push((*hash.as_bytes(), bincode::serialize(tx)?));
            }
        }

        let result: Result<(), SledTransactionError<()>> = (
            &self.blocks,
            &self.block_ids,
            &self.transactions,
            &self.metadata,
        )
            .transaction(|(blocks, block_ids, txs, metadata)| {
                blocks.insert(&hash_key[..], block_bytes.as_slice())?;
                block_ids.insert(&id_key[..], &hash_key[..])?;
                for (key, value) in &tx_rows {
                    txs.insert(&key[..], value.as_slice())?;
                }
                metadata.insert(META_TIP, tip_bytes.as_slice())?;
                Ok(())
            });

        match result {
            Ok(()) => {}
            Err(SledTransactionError::Storage(e)) => return Err(StorageError::Sled(e)),
            Err(SledTransactionError::Abort(())) => {
                return Err(StorageError::Corrupt("block append aborted".to_string()))
            }
        }

        self.db.flush()?;
        Ok(())
    }

    fn block(&self, block_id: u64) -> StorageResult<Option<Block>> {
        match self.block_ids.get(block_id.to_be_bytes())? {
            Some(hash) => {
                let bytes = self.blocks.get(&hash)?.ok_or_else(|| {
                    StorageError::Corrupt(format!("block {block_id} indexed but missing"))
                })?;
                Ok(Some(Self::decode_block(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn block_by_hash(&self, hash: &QuadritDigest) -> StorageResult<Option<Block>> {
        match self.blocks.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    fn transaction(&self, hash: &QuadritDigest) -> StorageResult<Option<Transaction>> {
        match self.transactions.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains_block(&self, hash: &QuadritDigest) -> StorageResult<bool> {
        Ok(self.blocks.contains_key(hash.as_bytes())?)
    }

    fn contains_transaction(&self, hash: &QuadritDigest) -> StorageResult<bool> {
        Ok(self.transactions.contains_key(hash.as_bytes())?)
    }

    fn tip(&self) -> StorageResult<ChainTip> {
        match self.metadata.get(META_TIP)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(ChainTip::GENESIS),
        }
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::RnaTemplate;
    use crate::transaction::{Metadata, TransactionBuilder};

    fn make_tx(n: u64) -> Transaction {
        TransactionBuilder::new()
            .sender("alice")
            .recipient("bob")
            .amount(n)
            .timestamp(1_700_000_000_000 + n)
            .build()
            .unwrap()
    }

    /// `count` blocks, one transaction each, linked from genesis.
    fn make_chain(count: u64) -> Vec<(Block, Vec<Transaction>)> {
        let mut tip = ChainTip::GENESIS;
        let mut out = Vec::new();
        for i in 0..count {
            let txs = vec![make_tx(i)];
            let template = RnaTemplate::new(
                "proposer",
                i,
                txs.iter().map(Transaction::hash).collect(),
                Metadata::new(),
            );
            let block = Block::new(tip.next_block_id, 1_000 + i, tip.tip_hash, template);
            tip = ChainTip::after(&block);
            out.push((block, txs));
        }
        out
    }

    fn exercise(store: &dyn BlockStore) {
        assert_eq!(store.tip().unwrap(), ChainTip::GENESIS);
        let chain = make_chain(3);
        for (block, txs) in &chain {
            store.append(block, txs).unwrap();
        }

        assert_eq!(store.block_count(), 3);
        assert_eq!(store.transaction_count(), 3);
        assert_eq!(store.tip().unwrap(), ChainTip::after(&chain[2].0));

        let (b1, txs1) = &chain[1];
        assert_eq!(store.block(1).unwrap().as_ref(), Some(b1));
        assert_eq!(store.block_by_hash(&b1.block_hash()).unwrap().as_ref(), Some(b1));
        assert!(store.contains_block(&b1.block_hash()).unwrap());
        assert_eq!(store.transaction(&txs1[0].hash()).unwrap().as_ref(), Some(&txs1[0]));
        assert!(store.contains_transaction(&txs1[0].hash()).unwrap());
        assert!(store.resolve(&txs1[0].hash()).is_some());

        assert!(store.block(9).unwrap().is_none());
        assert!(store.block_by_hash(&QuadritDigest::ZERO).unwrap().is_none());
    }

    fn refuses_out_of_order(store: &dyn BlockStore) {
        let chain = make_chain(2);
        let err = store.append(&chain[1].0, &chain[1].1).unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { expected: 0, actual: 1 }));

        store.append(&chain[0].0, &chain[0].1).unwrap();
        let err = store.append(&chain[0].0, &chain[0].1).unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { expected: 1, actual: 0 }));

        let forked = Block::new(
            1,
            0,
            QuadritDigest::ZERO,
            chain[1].0.rna_template().clone(),
        );
        let err = store.append(&forked, &chain[1].1).unwrap_err();
        assert!(matches!(err, StorageError::BrokenLink { .. }));

        let err = store.append(&chain[1].0, &[]).unwrap_err();
        assert!(matches!(err, StorageError::MissingTransaction { block_id: 1, .. }));
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn memory_store_round_trip() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn memory_store_is_append_only() {
        refuses_out_of_order(&MemoryStore::new());
    }

    #[test]
    fn ledger_db_round_trip() {
        exercise(&LedgerDb::open_temporary().unwrap());
    }

    #[test]
    fn ledger_db_is_append_only() {
        refuses_out_of_order(&LedgerDb::open_temporary().unwrap());
    }

    #[test]
    fn ledger_db_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chain = make_chain(2);
        {
            let db = LedgerDb::open(dir.path()).unwrap();
            for (block, txs) in &chain {
                db.append(block, txs).unwrap();
            }
            db.flush().unwrap();
        }

        let db = LedgerDb::open(dir.path()).unwrap();
        assert_eq!(db.block_count(), 2);
        assert_eq!(db.tip().unwrap(), ChainTip::after(&chain[1].0));
        assert_eq!(db.block(0).unwrap().unwrap(), chain[0].0);
    }
}
