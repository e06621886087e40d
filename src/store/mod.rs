//! Concrete chain + mempool collaborators.
//!
//! [`MemoryChain`] keeps everything in process; [`SqliteChainStore`] persists
//! the same model to an embedded database.
pub mod memory;
pub use memory::{MemoryChain, MemorySnapshot};

#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::{SqliteChainStore, SqliteSnapshot};
