//! Candidate events produced by the scanners and the records returned to callers.
use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};
use serde::{Serialize, Serializer};

/// Where the transaction behind an event lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Mined in an active-chain block.
    Confirmed {
        /// Block hash.
        block_hash: BlockHash,
        /// Block height.
        height: u32,
    },
    /// In the mempool snapshot.
    Unconfirmed,
}

impl Origin {
    /// Block hash when confirmed.
    pub fn block_hash(&self) -> Option<BlockHash> {
        match self {
            Origin::Confirmed { block_hash, .. } => Some(*block_hash),
            Origin::Unconfirmed => None,
        }
    }

    /// Height when confirmed.
    pub fn height(&self) -> Option<u32> {
        match self {
            Origin::Confirmed { height, .. } => Some(*height),
            Origin::Unconfirmed => None,
        }
    }
}

/// An output that matched a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveCandidate {
    /// Matching descriptor string.
    pub descriptor: String,
    /// Created output.
    pub outpoint: OutPoint,
    /// Output script.
    pub script_pubkey: ScriptBuf,
    /// Output value.
    pub value: Amount,
    /// Creating transaction's location.
    pub origin: Origin,
}

/// An input whose previous output matched a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendCandidate {
    /// Matching descriptor string.
    pub descriptor: String,
    /// Spending transaction.
    pub spend_txid: Txid,
    /// Input index inside the spending transaction.
    pub spend_vin: u32,
    /// Consumed output.
    pub prevout: OutPoint,
    /// Consumed output's script.
    pub script_pubkey: ScriptBuf,
    /// Consumed output's value.
    pub value: Amount,
    /// Spending transaction's location.
    pub origin: Origin,
    /// Location of the consumed output's creation, when its receive under the same
    /// descriptor lies inside the scope.
    ///
    /// Filled in by the spend resolver; a resolved spend is ordered after that receive.
    pub prevout_origin: Option<Origin>,
}

/// One scanner event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Funds arriving at a matching script.
    Receive(ReceiveCandidate),
    /// Funds leaving a matching script.
    Spend(SpendCandidate),
}

impl Candidate {
    /// Uniqueness key: (descriptor, txid, index, kind).
    pub(crate) fn key(&self) -> (&str, Txid, u32, EventKind) {
        match self {
            Candidate::Receive(r) => (
                &r.descriptor,
                r.outpoint.txid,
                r.outpoint.vout,
                EventKind::Receive,
            ),
            Candidate::Spend(s) => (
                &s.descriptor,
                s.spend_txid,
                s.spend_vin,
                EventKind::Spend,
            ),
        }
    }
}

/// Record kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Receive.
    Receive,
    /// Spend.
    Spend,
}

/// Receive entry of the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiveRecord {
    /// Address form of the script, if it has one on the configured network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Matching descriptor string.
    pub descriptor: String,
    /// Output script.
    pub script_pubkey: ScriptBuf,
    /// Creating transaction.
    pub txid: Txid,
    /// Output index.
    pub vout: u32,
    /// Output value.
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub amount: Amount,
    /// Containing block, `""` when unconfirmed.
    #[serde(serialize_with = "blockhash_or_empty")]
    pub blockhash: Option<BlockHash>,
    /// Containing block height, absent when unconfirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Spend entry of the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpendRecord {
    /// Address form of the consumed script, if it has one on the configured network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Matching descriptor string.
    pub descriptor: String,
    /// Consumed output's script.
    pub script_pubkey: ScriptBuf,
    /// Spending transaction.
    pub spend_txid: Txid,
    /// Spending input index.
    pub spend_vin: u32,
    /// Transaction that created the consumed output.
    pub prevout_txid: Txid,
    /// Index of the consumed output.
    pub prevout_vout: u32,
    /// Consumed value.
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub amount: Amount,
    /// Block containing the spend, `""` when unconfirmed.
    #[serde(serialize_with = "blockhash_or_empty")]
    pub blockhash: Option<BlockHash>,
    /// Height of the spending block, absent when unconfirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// One externally visible activity entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActivityRecord {
    /// `"type": "receive"`.
    Receive(ReceiveRecord),
    /// `"type": "spend"`.
    Spend(SpendRecord),
}

impl ActivityRecord {
    /// Record kind.
    pub fn kind(&self) -> EventKind {
        match self {
            ActivityRecord::Receive(_) => EventKind::Receive,
            ActivityRecord::Spend(_) => EventKind::Spend,
        }
    }

    /// Rendered address, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            ActivityRecord::Receive(r) => r.address.as_deref(),
            ActivityRecord::Spend(s) => s.address.as_deref(),
        }
    }

    /// Containing block, `None` when unconfirmed.
    pub fn blockhash(&self) -> Option<BlockHash> {
        match self {
            ActivityRecord::Receive(r) => r.blockhash,
            ActivityRecord::Spend(s) => s.blockhash,
        }
    }

    /// Value received or spent.
    pub fn amount(&self) -> Amount {
        match self {
            ActivityRecord::Receive(r) => r.amount,
            ActivityRecord::Spend(s) => s.amount,
        }
    }

    /// Transaction this record is about (creator for receives, spender for spends).
    pub fn txid(&self) -> Txid {
        match self {
            ActivityRecord::Receive(r) => r.txid,
            ActivityRecord::Spend(s) => s.spend_txid,
        }
    }
}

/// Query result: `{ "activity": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityResult {
    /// Records in output order.
    pub activity: Vec<ActivityRecord>,
}

fn blockhash_or_empty<S: Serializer>(hash: &Option<BlockHash>, s: S) -> Result<S::Ok, S::Error> {
    match hash {
        Some(hash) => hash.serialize(s),
        None => s.serialize_str(""),
    }
}
