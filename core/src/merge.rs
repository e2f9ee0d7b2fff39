//! Merge detection: collapsing replications whose states coincide again.
//!
//! The cheap pre-check is the incremental hash; a match is confirmed with
//! full state equality before anything is unioned. A hash collision without
//! state equality is tolerated; both replications simply continue. Two scan
//! strategies are offered: the pairwise scan works for any mode, the grouped
//! scan exploits the structure of subgradient-only runs where only the
//! lowest-`min_num_split` base lineage is a plausible partner.

use crate::model::CtmcModel;
use crate::replication::Replication;
use crate::types::PoolIndex;
use std::collections::BTreeMap;

/// Attempt to merge two replications. On success the survivor (the one with
/// the smaller `min_num_split`) holds the union of both trajectory sets and
/// the loser is left empty.
pub fn try_merge<M: CtmcModel>(a: &mut Replication<M>, b: &mut Replication<M>) -> bool {
    if a.is_exhausted() || b.is_exhausted() {
        return false;
    }
    if a.hash() != b.hash() {
        return false;
    }
    if !a.model().state_eq(b.model()) {
        // hash collision: necessary but not sufficient
        log::trace!("hash collision without state equality, merge declined");
        return false;
    }
    if b.min_num_split() < a.min_num_split() {
        b.absorb(a);
    } else {
        a.absorb(b);
    }
    true
}

/// O(n²) scan over all live replications. Emptied losers are dropped from
/// the vec before returning.
pub fn pairwise_scan<M: CtmcModel>(reps: &mut Vec<Replication<M>>) -> usize {
    let mut merges = 0;
    for i in 0..reps.len() {
        if reps[i].is_exhausted() {
            continue;
        }
        for j in i + 1..reps.len() {
            if reps[j].is_exhausted() {
                continue;
            }
            let (head, tail) = reps.split_at_mut(j);
            if try_merge(&mut head[i], &mut tail[0]) {
                merges += 1;
                if head[i].is_exhausted() {
                    break;
                }
            }
        }
    }
    reps.retain(|r| !r.is_exhausted());
    merges
}

/// Grouped scan for subgradient-only runs: replications are keyed by the
/// divergence pool of their base lineage and each bucket is kept in
/// `min_num_split` order. Only the bucket head, the lowest-priority base
/// lineage, is a plausible partner for the rest of its bucket.
pub fn grouped_scan<M: CtmcModel>(reps: &mut Vec<Replication<M>>) -> usize {
    let mut merges = 0;

    let mut buckets: BTreeMap<Option<PoolIndex>, Vec<usize>> = BTreeMap::new();
    for (i, rep) in reps.iter().enumerate() {
        buckets.entry(rep.divergence_pool()).or_default().push(i);
    }
    for idxs in buckets.values_mut() {
        idxs.sort_by_key(|&i| (reps[i].min_num_split(), i));
    }

    for idxs in buckets.values() {
        for w in 1..idxs.len() {
            merges += merge_pair(reps, idxs[0], idxs[w]) as usize;
        }
    }

    if let Some(base) = buckets.get(&None).and_then(|v| v.first()).copied() {
        for (key, idxs) in &buckets {
            if key.is_none() {
                continue;
            }
            if let Some(&head) = idxs.first() {
                merges += merge_pair(reps, base, head) as usize;
            }
        }
    }

    reps.retain(|r| !r.is_exhausted());
    merges
}

fn merge_pair<M: CtmcModel>(reps: &mut [Replication<M>], i: usize, j: usize) -> bool {
    if i == j {
        return false;
    }
    let (lo, hi) = (i.min(j), i.max(j));
    let (head, tail) = reps.split_at_mut(hi);
    try_merge(&mut head[lo], &mut tail[0])
}
