//! Validation of caller-supplied block identifiers against the active chain.
use anyhow::Context;
use bitcoin::{Block, BlockHash};
use std::{collections::HashSet, str::FromStr, sync::Arc};

use crate::{
    chain::ChainSnapshot,
    config::ScopeOrder,
    error::{ActivityError, BlockRejection},
};

/// A block the query may read.
#[derive(Debug, Clone)]
pub struct ScopedBlock {
    /// Block hash.
    pub hash: BlockHash,
    /// Active-chain height.
    pub height: u32,
    /// Full block.
    pub block: Arc<Block>,
}

/// The full universe a query may report activity from.
#[derive(Debug, Clone, Default)]
pub struct ScanScope {
    /// Blocks in scan order.
    pub blocks: Vec<ScopedBlock>,
    /// Whether the mempool snapshot is scanned too.
    pub include_mempool: bool,
}

/// Resolve `ids` in order against `snapshot`. Any bad identifier fails the whole scope.
///
/// Repeated identifiers keep their first position only.
pub async fn resolve_scope<S>(
    snapshot: &S,
    ids: &[String],
    include_mempool: bool,
    order: ScopeOrder,
) -> Result<ScanScope, ActivityError>
where
    S: ChainSnapshot + ?Sized,
{
    let mut seen = HashSet::with_capacity(ids.len());
    let mut blocks = Vec::with_capacity(ids.len());

    for id in ids {
        let reject = |reason| ActivityError::UnknownBlock {
            id: id.clone(),
            reason,
        };

        let hash = parse_block_hash(id).ok_or_else(|| reject(BlockRejection::Malformed))?;
        if !seen.insert(hash) {
            continue;
        }

        let block = snapshot
            .block(hash)
            .await
            .with_context(|| format!("block({hash})"))?
            .ok_or_else(|| reject(BlockRejection::NotFound))?;

        if !snapshot
            .is_on_active_chain(hash)
            .await
            .with_context(|| format!("is_on_active_chain({hash})"))?
        {
            return Err(reject(BlockRejection::NotInActiveChain));
        }

        let height = snapshot
            .block_height(hash)
            .await
            .with_context(|| format!("block_height({hash})"))?
            .ok_or_else(|| reject(BlockRejection::NotFound))?;

        blocks.push(ScopedBlock {
            hash,
            height,
            block: Arc::new(block),
        });
    }

    if order == ScopeOrder::Height {
        blocks.sort_by_key(|b| b.height);
    }

    log::debug!(
        "scope resolved: {} block(s), mempool={}",
        blocks.len(),
        include_mempool
    );

    Ok(ScanScope {
        blocks,
        include_mempool,
    })
}

fn parse_block_hash(id: &str) -> Option<BlockHash> {
    if id.len() != 64 {
        return None;
    }
    BlockHash::from_str(id).ok()
}
