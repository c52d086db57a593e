//! The finalized chain: a tip plus the store behind it.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::block::{Block, BlockError, ChainTip};
use super::db::{BlockStore, StorageError, StorageResult};
use crate::transaction::Transaction;

/// Problems found while walking the stored chain.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("block {0} is missing")]
    MissingBlock(u64),

    #[error("block {block_id} is invalid: {source}")]
    InvalidBlock {
        block_id: u64,
        #[source]
        source: BlockError,
    },

    #[error("store tip {stored} disagrees with the walked chain {walked}")]
    TipMismatch { stored: ChainTip, walked: ChainTip },
}

/// Owns the chain tip and appends finalized blocks to a [`BlockStore`].
///
/// The tip is cached here and only moves through [`Chain::append`]. Callers
/// serialize access (the finality engine keeps the chain behind a mutex), so
/// a tip read followed by an append cannot be interleaved with another
/// append.
pub struct Chain {
    tip: ChainTip,
    store: Arc<dyn BlockStore>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("tip", &self.tip).finish()
    }
}

impl Chain {
    /// Loads the tip from `store`.
    pub fn open(store: Arc<dyn BlockStore>) -> StorageResult<Self> {
        let tip = store.tip()?;
        Ok(Self { tip, store })
    }

    pub fn tip(&self) -> ChainTip {
        self.tip
    }

    pub fn height(&self) -> u64 {
        self.tip.height()
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Persists a finalized block and advances the tip. On error the tip is
    /// unchanged.
    pub fn append(&mut self, block: &Block, transactions: &[Transaction]) -> StorageResult<ChainTip> {
        self.store.append(block, transactions)?;
        self.tip = ChainTip::after(block);
        info!(
            block_id = block.block_id(),
            hash = %block.block_hash().short(),
            txs = block.transaction_hashes().len(),
            attestations = block.cip().len(),
            "block appended"
        );
        Ok(self.tip)
    }

    /// Walks every stored block from position 0 and re-checks structure,
    /// hash links, and transaction availability. Returns the height walked.
    ///
    /// Seals are not re-verified: validator sets change over time and the
    /// store does not keep historical ones.
    pub fn verify_integrity(&self) -> Result<u64, IntegrityError> {
        let store: &dyn BlockStore = self.store.as_ref();
        let stored_tip = store.tip()?;
        let mut walked = ChainTip::GENESIS;

        while walked.next_block_id < stored_tip.next_block_id {
            let block = store
                .block(walked.next_block_id)?
                .ok_or(IntegrityError::MissingBlock(walked.next_block_id))?;
            block
                .validate_structure(&walked, store)
                .map_err(|source| IntegrityError::InvalidBlock {
                    block_id: block.block_id(),
                    source,
                })?;
            walked = ChainTip::after(&block);
        }

        if walked != stored_tip {
            return Err(IntegrityError::TipMismatch {
                stored: stored_tip,
                walked,
            });
        }
        Ok(walked.height())
    }
}
