//! Read-side interfaces to the chain and mempool a query runs against.
use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, Transaction, TxOut};
use std::sync::Arc;

/// Provider of frozen {active chain, block storage, mempool} views.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Snapshot type handed to the scanners.
    type Snapshot: ChainSnapshot + 'static;

    /// Take one view of chain tip and mempool that stays consistent for a whole query.
    async fn snapshot(&self) -> anyhow::Result<Self::Snapshot>;
}

#[async_trait]
impl<T: ChainSource> ChainSource for Arc<T> {
    type Snapshot = T::Snapshot;

    async fn snapshot(&self) -> anyhow::Result<T::Snapshot> {
        T::snapshot(self).await
    }
}

/// One consistent view of chain and mempool.
///
/// Every read must reflect the same state. An implementation that cannot
/// guarantee this for the lifetime of the value must fail the read with
/// [`StaleSnapshot`] instead of answering from newer state.
#[async_trait]
pub trait ChainSnapshot: Send + Sync {
    /// Full block by hash, whether or not it is on the active chain.
    async fn block(&self, hash: BlockHash) -> anyhow::Result<Option<Block>>;

    /// Whether `hash` is part of the active chain.
    async fn is_on_active_chain(&self, hash: BlockHash) -> anyhow::Result<bool>;

    /// Height of a stored block.
    async fn block_height(&self, hash: BlockHash) -> anyhow::Result<Option<u32>>;

    /// Output created by an active-chain or mempool transaction, spent or not.
    async fn prev_output(&self, outpoint: OutPoint) -> anyhow::Result<Option<TxOut>>;

    /// Unconfirmed transactions, in pool order.
    async fn mempool_transactions(&self) -> anyhow::Result<Vec<Transaction>>;
}

/// The backing state moved past the generation a snapshot was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("snapshot taken at generation {expected}, store is at {found}")]
pub struct StaleSnapshot {
    /// Generation recorded when the snapshot was taken.
    pub expected: u64,
    /// Generation observed by the failing read.
    pub found: u64,
}
