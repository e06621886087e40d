#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! descriptor-activity: receive/spend history for a set of output descriptors
//! over an explicit list of blocks and, optionally, the mempool.
//!
//! ## What you implement
//! - [`ChainSource`]: hand out consistent snapshots of chain and mempool.
//! - [`ChainSnapshot`]: read blocks, active-chain membership, heights, previous
//!   outputs and mempool transactions from one snapshot.
//!
//! [`MemoryChain`] and [`SqliteChainStore`] are ready-made implementations.
//!
//! ## What the engine does
//! - Expands descriptors (`addr()`, `raw()`, miniscript, ranged, multipath) into scripts.
//! - Rejects any block id that is unknown or not on the active chain.
//! - Scans the listed blocks (in parallel) and the mempool for receives and spends.
//! - Returns one ordered list: blocks in the given order, then the mempool, with
//!   every spend placed after the receive of the output it consumes.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use descriptor_activity::prelude::*;
//!
//! async fn run(chain: MemoryChain, block: String, addr: String) -> anyhow::Result<()> {
//!     let engine = ActivityEngine::new(chain);
//!     let result = engine
//!         .get_descriptor_activity(&[block], &[format!("addr({addr})")], true)
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
/// Query orchestration: snapshot, scope, scans, aggregation.
pub mod engine;

/// Interfaces to the chain and mempool being queried.
pub mod chain;

/// Engine configuration.
pub mod config;

/// Descriptor parsing and expansion.
pub mod descriptor;

/// Query errors.
pub mod error;

/// Script → descriptor lookup.
pub mod matcher;

/// Block id validation and scan scope.
pub mod scope;

/// Block and mempool scanners.
pub mod scanner;

/// Events and result records.
pub mod types;

mod aggregate;
mod resolver;

/// Chain and mempool stores (in-memory and SQLite).
pub mod store;

// Public re-exports
pub use chain::{ChainSnapshot, ChainSource, StaleSnapshot};
pub use config::{ActivityConfig, ScopeOrder};
pub use descriptor::{DerivationRange, DescriptorRequest};
pub use engine::ActivityEngine;
pub use error::{ActivityError, BlockRejection};
pub use store::MemoryChain;
#[cfg(feature = "store-sqlite")]
pub use store::SqliteChainStore;
pub use types::{ActivityRecord, ActivityResult, EventKind, Origin, ReceiveRecord, SpendRecord};

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        ActivityConfig, ActivityEngine, ActivityError, ActivityRecord, ActivityResult,
        ChainSnapshot, ChainSource, DescriptorRequest, MemoryChain,
    };
    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteChainStore;
}
