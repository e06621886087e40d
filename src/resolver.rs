//! Association of spends with the in-scope creation of the outputs they consume.
use bitcoin::OutPoint;
use std::collections::HashMap;

use crate::types::{Candidate, Origin};

/// Fill `prevout_origin` on every spend whose consumed output was received, under
/// the same descriptor, inside the scope.
///
/// Only receives already present in `candidates` are consulted; nothing outside
/// the scanned blocks and mempool snapshot is looked at. The aggregator orders
/// a resolved spend after its receive.
pub fn resolve_spends(candidates: &mut [Candidate]) {
    let created: HashMap<(String, OutPoint), Origin> = candidates
        .iter()
        .filter_map(|c| match c {
            Candidate::Receive(r) => Some(((r.descriptor.clone(), r.outpoint), r.origin)),
            Candidate::Spend(_) => None,
        })
        .collect();

    let mut resolved = 0usize;
    for candidate in candidates.iter_mut() {
        if let Candidate::Spend(spend) = candidate {
            let key = (spend.descriptor.clone(), spend.prevout);
            spend.prevout_origin = created.get(&key).copied();
            resolved += usize::from(spend.prevout_origin.is_some());
        }
    }
    log::trace!("{resolved} spend(s) consume outputs created in scope");
}
