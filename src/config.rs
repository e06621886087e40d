//! Query engine configuration.
use bitcoin::Network;
use serde::Deserialize;

/// How the resolved block list is ordered before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeOrder {
    /// Scan blocks in the order the caller listed them.
    #[default]
    AsGiven,
    /// Stable-sort the listed blocks by height first.
    Height,
}

/// Tunables for [`ActivityEngine`](crate::ActivityEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Network that `addr()` descriptors must belong to and that record addresses are rendered for.
    pub network: Network,
    /// Last derivation index for ranged descriptors given without a range (first is 0).
    pub default_range_end: u32,
    /// Upper bound on scripts derived from one ranged descriptor.
    pub max_range_size: u32,
    /// Blocks scanned concurrently; `<= 1` scans on the calling task.
    pub max_parallel_scans: usize,
    /// Fresh-snapshot retries after an inconsistent read.
    pub snapshot_retries: u32,
    /// Ordering applied to the resolved scope.
    pub scope_order: ScopeOrder,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            default_range_end: 1000,
            max_range_size: 1_000_000,
            max_parallel_scans: 4,
            snapshot_retries: 3,
            scope_order: ScopeOrder::AsGiven,
        }
    }
}

impl ActivityConfig {
    /// Set the network.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Set the scan parallelism.
    pub fn with_max_parallel_scans(mut self, n: usize) -> Self {
        self.max_parallel_scans = n;
        self
    }

    /// Set the snapshot retry budget.
    pub fn with_snapshot_retries(mut self, n: u32) -> Self {
        self.snapshot_retries = n;
        self
    }

    /// Set the scope ordering.
    pub fn with_scope_order(mut self, order: ScopeOrder) -> Self {
        self.scope_order = order;
        self
    }
}
