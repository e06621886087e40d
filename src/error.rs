//! Errors surfaced by a descriptor activity query.
use bitcoin::{OutPoint, Txid};
use std::fmt;

use crate::chain::StaleSnapshot;

/// Why a caller-supplied block identifier was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRejection {
    /// Not a 64-character hex block hash.
    Malformed,
    /// No block with this hash is stored.
    NotFound,
    /// The block is stored but not part of the active chain.
    NotInActiveChain,
}

impl fmt::Display for BlockRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRejection::Malformed => f.write_str("blockhash must be 64 hex characters"),
            BlockRejection::NotFound => f.write_str("Block not found"),
            BlockRejection::NotInActiveChain => f.write_str("Block is not in main chain"),
        }
    }
}

/// Failure of a whole query. No partial activity is ever returned alongside one of these.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// A descriptor string could not be parsed or expanded.
    #[error("invalid descriptor `{descriptor}`: {reason}")]
    InvalidDescriptor {
        /// The descriptor as the caller gave it.
        descriptor: String,
        /// Parser or derivation failure.
        reason: String,
    },

    /// A block identifier is unknown or not on the active chain.
    #[error("{reason}: {id}")]
    UnknownBlock {
        /// The identifier as the caller gave it.
        id: String,
        /// Rejection kind.
        reason: BlockRejection,
    },

    /// The chain/mempool view changed while the query was reading it.
    #[error("chain snapshot became inconsistent: {0}")]
    InconsistentSnapshot(String),

    /// An input's previous output is absent from the storage engine.
    #[error("previous output {outpoint} spent by {txid} is not available")]
    MissingPrevout {
        /// Spending transaction.
        txid: Txid,
        /// The unresolved previous output.
        outpoint: OutPoint,
    },

    /// Any other collaborator failure.
    #[error(transparent)]
    Source(anyhow::Error),
}

impl ActivityError {
    pub(crate) fn invalid_descriptor(descriptor: &str, reason: impl fmt::Display) -> Self {
        ActivityError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures a fresh snapshot may cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ActivityError::InconsistentSnapshot(_))
    }
}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        if err.is::<StaleSnapshot>() {
            ActivityError::InconsistentSnapshot(format!("{err:#}"))
        } else {
            ActivityError::Source(err)
        }
    }
}
