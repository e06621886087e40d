//! Per-block and mempool transaction scans.
//!
//! Both scanners walk transactions in order, emit a receive per matching
//! descriptor for every output, then a spend per matching descriptor for every
//! non-coinbase input whose previous output matches. Looking up a previous
//! output's script is allowed anywhere in storage; whether its *receive* shows
//! up is decided solely by which blocks are scanned.
use anyhow::Context;
use bitcoin::{OutPoint, Transaction, TxOut};
use std::collections::HashMap;

use crate::{
    chain::ChainSnapshot,
    error::ActivityError,
    matcher::ScriptIndex,
    scope::ScopedBlock,
    types::{Candidate, Origin, ReceiveCandidate, SpendCandidate},
};

/// Candidates of one scoped block, in transaction order.
pub async fn scan_block<S>(
    snapshot: &S,
    index: &ScriptIndex,
    scoped: &ScopedBlock,
) -> Result<Vec<Candidate>, ActivityError>
where
    S: ChainSnapshot + ?Sized,
{
    if index.is_empty() {
        return Ok(Vec::new());
    }

    let origin = Origin::Confirmed {
        block_hash: scoped.hash,
        height: scoped.height,
    };

    // outputs created earlier in this block, so in-block chains skip the store
    let mut local = HashMap::new();
    let mut candidates = Vec::new();
    for tx in &scoped.block.txdata {
        candidates.extend(scan_transaction(snapshot, index, tx, origin, &local).await?);
        remember_outputs(&mut local, tx);
    }

    log::debug!(
        "block {} @{}: {} candidate(s) from {} tx(s)",
        scoped.hash,
        scoped.height,
        candidates.len(),
        scoped.block.txdata.len()
    );
    Ok(candidates)
}

/// Candidates of the snapshot's mempool, in pool order.
pub async fn scan_mempool<S>(
    snapshot: &S,
    index: &ScriptIndex,
) -> Result<Vec<Candidate>, ActivityError>
where
    S: ChainSnapshot + ?Sized,
{
    if index.is_empty() {
        return Ok(Vec::new());
    }

    let txs = snapshot
        .mempool_transactions()
        .await
        .context("mempool_transactions")?;

    let mut local = HashMap::new();
    for tx in &txs {
        remember_outputs(&mut local, tx);
    }

    let mut candidates = Vec::new();
    for tx in &txs {
        let found = scan_transaction(snapshot, index, tx, Origin::Unconfirmed, &local).await?;
        candidates.extend(found);
    }

    log::debug!(
        "mempool: {} candidate(s) from {} tx(s)",
        candidates.len(),
        txs.len()
    );
    Ok(candidates)
}

async fn scan_transaction<S>(
    snapshot: &S,
    index: &ScriptIndex,
    tx: &Transaction,
    origin: Origin,
    local: &HashMap<OutPoint, TxOut>,
) -> Result<Vec<Candidate>, ActivityError>
where
    S: ChainSnapshot + ?Sized,
{
    let txid = tx.compute_txid();
    let mut candidates = Vec::new();

    for (vout, txout) in tx.output.iter().enumerate() {
        let outpoint = OutPoint::new(txid, vout as u32);
        for descriptor in index.matches(&txout.script_pubkey) {
            log::trace!("receive {outpoint} matches {descriptor}");
            candidates.push(Candidate::Receive(ReceiveCandidate {
                descriptor: descriptor.clone(),
                outpoint,
                script_pubkey: txout.script_pubkey.clone(),
                value: txout.value,
                origin,
            }));
        }
    }

    if tx.is_coinbase() {
        return Ok(candidates);
    }

    for (vin, input) in tx.input.iter().enumerate() {
        let prevout = input.previous_output;
        let spent = match local.get(&prevout) {
            Some(txout) => txout.clone(),
            None => snapshot
                .prev_output(prevout)
                .await
                .with_context(|| format!("prev_output({prevout})"))?
                .ok_or(ActivityError::MissingPrevout {
                    txid,
                    outpoint: prevout,
                })?,
        };

        for descriptor in index.matches(&spent.script_pubkey) {
            log::trace!("spend of {prevout} by {txid}:{vin} matches {descriptor}");
            candidates.push(Candidate::Spend(SpendCandidate {
                descriptor: descriptor.clone(),
                spend_txid: txid,
                spend_vin: vin as u32,
                prevout,
                script_pubkey: spent.script_pubkey.clone(),
                value: spent.value,
                origin,
                prevout_origin: None,
            }));
        }
    }

    Ok(candidates)
}

fn remember_outputs(local: &mut HashMap<OutPoint, TxOut>, tx: &Transaction) {
    let txid = tx.compute_txid();
    for (vout, txout) in tx.output.iter().enumerate() {
        local.insert(OutPoint::new(txid, vout as u32), txout.clone());
    }
}
