//! Merging of scanner output into the final ordered activity list.
//!
//! Order: confirmed candidates block by block in scope order, then mempool
//! candidates in discovery order. The one reordering applied is that a spend
//! whose `prevout_origin` was resolved never precedes the receive of the output
//! it consumes (same descriptor); such a spend is moved to directly after that
//! receive.
use bitcoin::{Address, Network, OutPoint, Script, Txid};
use std::collections::HashSet;

use crate::types::{
    ActivityRecord, ActivityResult, Candidate, EventKind, ReceiveRecord, SpendRecord,
};

/// Turn candidates in merge order (scoped blocks, then mempool) into the result.
pub fn aggregate(candidates: Vec<Candidate>, network: Network) -> ActivityResult {
    let merged = dedup(candidates.into_iter());
    let ordered = receive_before_spend(merged);

    let activity: Vec<ActivityRecord> = ordered
        .into_iter()
        .map(|c| into_record(c, network))
        .collect();
    log::debug!("aggregated {} activity record(s)", activity.len());
    ActivityResult { activity }
}

fn dedup(candidates: impl Iterator<Item = Candidate>) -> Vec<Candidate> {
    let mut seen: HashSet<(String, Txid, u32, EventKind)> = HashSet::new();
    candidates
        .filter(|c| {
            let (descriptor, txid, index, kind) = c.key();
            seen.insert((descriptor.to_string(), txid, index, kind))
        })
        .collect()
}

fn receive_before_spend(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let order = {
        let mut emitted: HashSet<(&str, OutPoint)> = HashSet::new();
        let mut deferred: Vec<usize> = Vec::new();
        let mut order = Vec::with_capacity(candidates.len());

        for (i, candidate) in candidates.iter().enumerate() {
            match candidate {
                // only spends whose consumed output was received in scope can wait
                Candidate::Spend(s)
                    if s.prevout_origin.is_some()
                        && !emitted.contains(&(s.descriptor.as_str(), s.prevout)) =>
                {
                    deferred.push(i)
                }
                Candidate::Spend(_) => order.push(i),
                Candidate::Receive(r) => {
                    order.push(i);
                    emitted.insert((r.descriptor.as_str(), r.outpoint));
                    deferred.retain(|&j| {
                        let waits_here = matches!(
                            &candidates[j],
                            Candidate::Spend(s)
                                if s.descriptor == r.descriptor && s.prevout == r.outpoint
                        );
                        if waits_here {
                            order.push(j);
                        }
                        !waits_here
                    });
                }
            }
        }
        order.extend(deferred);
        order
    };

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

fn into_record(candidate: Candidate, network: Network) -> ActivityRecord {
    match candidate {
        Candidate::Receive(r) => ActivityRecord::Receive(ReceiveRecord {
            address: render_address(&r.script_pubkey, network),
            descriptor: r.descriptor,
            txid: r.outpoint.txid,
            vout: r.outpoint.vout,
            amount: r.value,
            blockhash: r.origin.block_hash(),
            height: r.origin.height(),
            script_pubkey: r.script_pubkey,
        }),
        Candidate::Spend(s) => ActivityRecord::Spend(SpendRecord {
            address: render_address(&s.script_pubkey, network),
            descriptor: s.descriptor,
            spend_txid: s.spend_txid,
            spend_vin: s.spend_vin,
            prevout_txid: s.prevout.txid,
            prevout_vout: s.prevout.vout,
            amount: s.value,
            blockhash: s.origin.block_hash(),
            height: s.origin.height(),
            script_pubkey: s.script_pubkey,
        }),
    }
}

fn render_address(script: &Script, network: Network) -> Option<String> {
    Address::from_script(script, network)
        .ok()
        .map(|a| a.to_string())
}
