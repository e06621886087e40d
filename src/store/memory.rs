//! In-memory chain + mempool with copy-on-write snapshots.
use anyhow::{anyhow, ensure, Context};
use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint, Transaction, TxOut, Txid};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

use crate::chain::{ChainSnapshot, ChainSource};

#[derive(Debug, Clone)]
struct StoredBlock {
    block: Arc<Block>,
    height: u32,
}

/// Everything a snapshot can see.
#[derive(Debug, Clone, Default)]
struct ChainState {
    blocks: HashMap<BlockHash, StoredBlock>,
    /// Active chain, indexed by height.
    active: Vec<BlockHash>,
    mempool: Vec<Transaction>,
    /// Outputs of active-chain and mempool transactions.
    outputs: HashMap<OutPoint, TxOut>,
}

impl ChainState {
    fn index_outputs(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        for (vout, txout) in tx.output.iter().enumerate() {
            self.outputs
                .insert(OutPoint::new(txid, vout as u32), txout.clone());
        }
    }

    fn drop_outputs(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        for vout in 0..tx.output.len() {
            self.outputs.remove(&OutPoint::new(txid, vout as u32));
        }
    }
}

/// Chain and mempool kept in memory.
///
/// Each mutation builds the next state version from a copy and swaps it in
/// whole under the write lock; a failed mutation leaves the current version
/// untouched. Snapshots hold an `Arc` to the version current when they were
/// taken, so a query never observes a reorg or mempool change half way through.
#[derive(Debug, Default)]
pub struct MemoryChain {
    state: RwLock<Arc<ChainState>>,
}

impl MemoryChain {
    /// Empty chain, empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut ChainState) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow!("chain state lock poisoned"))?;
        let mut next = ChainState::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    fn current(&self) -> anyhow::Result<Arc<ChainState>> {
        let guard = self
            .state
            .read()
            .map_err(|_| anyhow!("chain state lock poisoned"))?;
        Ok(Arc::clone(&guard))
    }

    /// Append `block` to the active chain and evict its transactions from the mempool.
    /// Returns the new height.
    pub fn connect_block(&self, block: Block) -> anyhow::Result<u32> {
        self.update(|state| {
            let hash = block.block_hash();
            if let Some(tip) = state.active.last() {
                ensure!(
                    block.header.prev_blockhash == *tip,
                    "block {hash} does not extend tip {tip}"
                );
            }
            let height = state.active.len() as u32;

            let confirmed: HashSet<Txid> =
                block.txdata.iter().map(|tx| tx.compute_txid()).collect();
            state
                .mempool
                .retain(|tx| !confirmed.contains(&tx.compute_txid()));
            for tx in &block.txdata {
                state.index_outputs(tx);
            }

            state.blocks.insert(
                hash,
                StoredBlock {
                    block: Arc::new(block),
                    height,
                },
            );
            state.active.push(hash);
            Ok(height)
        })
    }

    /// Detach the tip. The block stays stored (stale); its non-coinbase
    /// transactions go back to the front of the mempool.
    pub fn disconnect_tip(&self) -> anyhow::Result<Option<BlockHash>> {
        self.update(|state| {
            let Some(hash) = state.active.pop() else {
                return Ok(None);
            };
            let stored = state
                .blocks
                .get(&hash)
                .cloned()
                .with_context(|| format!("active block {hash} missing from storage"))?;

            let mut returned = Vec::new();
            for tx in &stored.block.txdata {
                if tx.is_coinbase() {
                    state.drop_outputs(tx);
                } else {
                    returned.push(tx.clone());
                }
            }
            returned.append(&mut state.mempool);
            state.mempool = returned;
            Ok(Some(hash))
        })
    }

    /// Store a block that is known but not on the active chain (e.g. from a losing fork).
    pub fn store_stale_block(&self, block: Block, height: u32) -> anyhow::Result<BlockHash> {
        self.update(|state| {
            let hash = block.block_hash();
            ensure!(
                !state.active.contains(&hash),
                "block {hash} is on the active chain"
            );
            state.blocks.insert(
                hash,
                StoredBlock {
                    block: Arc::new(block),
                    height,
                },
            );
            Ok(hash)
        })
    }

    /// Add an unconfirmed transaction.
    pub fn add_to_mempool(&self, tx: Transaction) -> anyhow::Result<Txid> {
        self.update(|state| {
            let txid = tx.compute_txid();
            if !state.mempool.iter().any(|t| t.compute_txid() == txid) {
                state.index_outputs(&tx);
                state.mempool.push(tx);
            }
            Ok(txid)
        })
    }

    /// Active tip `(height, hash)`.
    pub fn tip(&self) -> anyhow::Result<Option<(u32, BlockHash)>> {
        let state = self.current()?;
        Ok(state
            .active
            .last()
            .map(|hash| (state.active.len() as u32 - 1, *hash)))
    }
}

/// Frozen view of a [`MemoryChain`].
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    state: Arc<ChainState>,
}

#[async_trait]
impl ChainSource for MemoryChain {
    type Snapshot = MemorySnapshot;

    async fn snapshot(&self) -> anyhow::Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            state: self.current()?,
        })
    }
}

#[async_trait]
impl ChainSnapshot for MemorySnapshot {
    async fn block(&self, hash: BlockHash) -> anyhow::Result<Option<Block>> {
        Ok(self
            .state
            .blocks
            .get(&hash)
            .map(|stored| Block::clone(&stored.block)))
    }

    async fn is_on_active_chain(&self, hash: BlockHash) -> anyhow::Result<bool> {
        Ok(self.state.blocks.get(&hash).is_some_and(|stored| {
            self.state.active.get(stored.height as usize) == Some(&hash)
        }))
    }

    async fn block_height(&self, hash: BlockHash) -> anyhow::Result<Option<u32>> {
        Ok(self.state.blocks.get(&hash).map(|stored| stored.height))
    }

    async fn prev_output(&self, outpoint: OutPoint) -> anyhow::Result<Option<TxOut>> {
        Ok(self.state.outputs.get(&outpoint).cloned())
    }

    async fn mempool_transactions(&self) -> anyhow::Result<Vec<Transaction>> {
        Ok(self.state.mempool.clone())
    }
}
