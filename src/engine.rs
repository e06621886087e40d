//! Orchestrator for one descriptor activity query:
//! 1) expand descriptors into a script index,
//! 2) take one chain/mempool snapshot and resolve the block list against it,
//! 3) scan the scoped blocks (and optionally the mempool),
//! 4) resolve spends and merge everything into the ordered result.
use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::{
    aggregate::aggregate,
    chain::ChainSource,
    config::ActivityConfig,
    descriptor::DescriptorRequest,
    error::ActivityError,
    matcher::ScriptIndex,
    resolver::resolve_spends,
    scanner::{scan_block, scan_mempool},
    scope::{resolve_scope, ScanScope},
    types::{ActivityResult, Candidate},
};

/// Query engine over a [`ChainSource`].
pub struct ActivityEngine<C> {
    source: C,
    config: ActivityConfig,
}

impl<C> ActivityEngine<C>
where
    C: ChainSource + 'static,
{
    /// Create an engine with the default configuration.
    pub fn new(source: C) -> Self {
        Self {
            source,
            config: ActivityConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ActivityConfig) -> Self {
        self.config = config;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    /// The underlying chain source.
    pub fn source(&self) -> &C {
        &self.source
    }

    /// List every receive into, and spend from, a script matching `descriptors`
    /// within the listed blocks, plus the mempool if `include_mempool`.
    ///
    /// # Arguments
    /// * `block_ids`: hex block hashes, scanned in the given order.
    /// * `descriptors`: descriptor strings or ranged descriptor objects.
    ///
    /// # Errors
    /// Fails as a whole on the first invalid descriptor, on any block id that is
    /// malformed, unknown or off the active chain, when the snapshot keeps changing
    /// underneath the query past the retry budget, or when a collaborator fails.
    pub async fn get_descriptor_activity<D>(
        &self,
        block_ids: &[String],
        descriptors: &[D],
        include_mempool: bool,
    ) -> Result<ActivityResult, ActivityError>
    where
        D: Clone + Into<DescriptorRequest>,
    {
        let requests: Vec<DescriptorRequest> =
            descriptors.iter().cloned().map(Into::into).collect();
        let index = Arc::new(ScriptIndex::build(&requests, &self.config)?);
        log::debug!(
            "{} descriptor(s) expanded to {} script(s)",
            requests.len(),
            index.script_count()
        );

        let mut attempt = 0;
        loop {
            match self.run_once(&index, block_ids, include_mempool).await {
                Err(err) if err.is_transient() && attempt < self.config.snapshot_retries => {
                    attempt += 1;
                    log::warn!(
                        "retrying query with a fresh snapshot ({attempt}/{}): {err}",
                        self.config.snapshot_retries
                    );
                }
                res => return res,
            }
        }
    }

    /// One attempt against one snapshot. The snapshot is dropped on return.
    async fn run_once(
        &self,
        index: &Arc<ScriptIndex>,
        block_ids: &[String],
        include_mempool: bool,
    ) -> Result<ActivityResult, ActivityError> {
        let snapshot = Arc::new(
            self.source
                .snapshot()
                .await
                .context("take chain snapshot")?,
        );

        let scope = resolve_scope(
            snapshot.as_ref(),
            block_ids,
            include_mempool,
            self.config.scope_order,
        )
        .await?;

        let per_block = self.scan_blocks(&snapshot, index, &scope).await?;
        let mempool = if scope.include_mempool {
            scan_mempool(snapshot.as_ref(), index).await?
        } else {
            Vec::new()
        };

        let mut candidates: Vec<Candidate> =
            per_block.into_iter().flatten().chain(mempool).collect();
        resolve_spends(&mut candidates);

        Ok(aggregate(candidates, self.config.network))
    }

    /// Scan every scoped block, returning candidate lists in scope order.
    async fn scan_blocks(
        &self,
        snapshot: &Arc<C::Snapshot>,
        index: &Arc<ScriptIndex>,
        scope: &ScanScope,
    ) -> Result<Vec<Vec<Candidate>>, ActivityError> {
        let width = self.config.max_parallel_scans;
        if width <= 1 || scope.blocks.len() <= 1 {
            let mut out = Vec::with_capacity(scope.blocks.len());
            for scoped in &scope.blocks {
                out.push(scan_block(snapshot.as_ref(), index, scoped).await?);
            }
            return Ok(out);
        }

        let mut out: Vec<Option<Vec<Candidate>>> = vec![None; scope.blocks.len()];
        for (window_no, window) in scope.blocks.chunks(width).enumerate() {
            let mut set = JoinSet::new();
            for (offset, scoped) in window.iter().enumerate() {
                let position = window_no * width + offset;
                let snapshot = Arc::clone(snapshot);
                let index = Arc::clone(index);
                let scoped = scoped.clone();
                set.spawn(async move {
                    let candidates = scan_block(snapshot.as_ref(), &index, &scoped).await;
                    (position, candidates)
                });
            }
            while let Some(joined) = set.join_next().await {
                let (position, candidates) = joined.context("block scan task")?;
                out[position] = Some(candidates?);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}
