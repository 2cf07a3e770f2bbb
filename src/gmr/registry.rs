//! The process-wide GMR registry (§9): a sorted index for pointer-range lookup plus an
//! id-keyed map for O(1) access, replacing the original's intrusive linked list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::os::{BTreeMap, HashMap, Mutex};

use super::Gmr;

pub type GmrId = u64;

struct Inner {
    by_id: HashMap<GmrId, Arc<Gmr>>,
    /// `(world_rank, base)` for every member rank whose slice has nonzero size;
    /// `BTreeMap` gives binary-search-style predecessor lookup via `range`.
    index: BTreeMap<(usize, usize), GmrId>,
    /// `(world_rank, id)` for every member rank whose slice is zero-sized, used only
    /// by the destroy consensus fallback (the "null pointer" special case).
    zero_size: Vec<(usize, GmrId)>,
}

lazy_static! {
    static ref REGISTRY: Mutex<Inner> = Mutex::new(Inner {
        by_id: HashMap::default(),
        index: BTreeMap::new(),
        zero_size: Vec::new(),
    });
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn fresh_id() -> GmrId {
    NEXT_ID.fetch_add(1, Ordering::SeqCst)
}

pub fn insert(gmr: Arc<Gmr>) {
    let mut reg = REGISTRY.lock();
    for (world_rank, slice) in gmr.member_slices() {
        if slice.size > 0 {
            reg.index.insert((world_rank, slice.base), gmr.id());
        } else {
            reg.zero_size.push((world_rank, gmr.id()));
        }
    }
    reg.by_id.insert(gmr.id(), gmr);
}

pub fn remove(id: GmrId) -> Option<Arc<Gmr>> {
    let mut reg = REGISTRY.lock();
    let gmr = reg.by_id.remove(&id)?;
    for (world_rank, slice) in gmr.member_slices() {
        if slice.size > 0 {
            reg.index.remove(&(world_rank, slice.base));
        }
    }
    reg.zero_size.retain(|&(_, gid)| gid != id);
    Some(gmr)
}

pub fn by_id(id: GmrId) -> Option<Arc<Gmr>> {
    REGISTRY.lock().by_id.get(&id).cloned()
}

/// Reverse lookup: which live GMR (if any) owns `ptr` on `world_rank`.
pub fn lookup(world_rank: usize, ptr: usize) -> Option<Arc<Gmr>> {
    let reg = REGISTRY.lock();
    for (&(rank, base), id) in reg.index.range(..=(world_rank, ptr)).rev() {
        if rank != world_rank {
            break;
        }
        let gmr = reg.by_id.get(id)?;
        let slice = gmr.slices()[world_rank];
        if ptr >= base && ptr < base + slice.size {
            return Some(gmr.clone());
        }
        // Ranges for one rank never overlap, so the predecessor missing means no
        // entry on this rank can contain `ptr`.
        break;
    }
    None
}

/// Resolve the victim of a collective destroy from the consensus `(owner_rank, base)`
/// pair, including the zero-size "null pointer" special case.
pub fn lookup_for_destroy(owner_rank: usize, base: usize) -> Option<Arc<Gmr>> {
    if base != 0 {
        return lookup(owner_rank, base);
    }
    let reg = REGISTRY.lock();
    reg.zero_size
        .iter()
        .rev()
        .find(|&&(rank, _)| rank == owner_rank)
        .and_then(|&(_, id)| reg.by_id.get(&id).cloned())
}

/// Count of live allocations, used by `finalize` to report leaks.
pub fn live_count() -> usize {
    REGISTRY.lock().by_id.len()
}

/// Forcibly drop every live allocation's bookkeeping (does not free substrate windows;
/// callers must do that first). Used by `finalize`.
pub fn clear_all() -> Vec<Arc<Gmr>> {
    let mut reg = REGISTRY.lock();
    let all: Vec<_> = reg.by_id.drain().map(|(_, v)| v).collect();
    reg.index.clear();
    reg.zero_size.clear();
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmr::Slice;
    use crate::substrate::LocalSubstrate;

    fn dummy_gmr(id: GmrId, slices: Vec<Slice>) -> Arc<Gmr> {
        let subs = LocalSubstrate::world(1);
        Arc::new(Gmr::for_test(id, 0, slices, subs.into_iter().next().unwrap()))
    }

    #[test]
    fn lookup_matches_exact_bounds() {
        let gmr = dummy_gmr(
            fresh_id(),
            vec![Slice { base: 100, size: 16 }],
        );
        insert(gmr.clone());
        assert!(lookup(0, 100).is_some());
        assert!(lookup(0, 115).is_some());
        assert!(lookup(0, 116).is_none());
        assert!(lookup(0, 99).is_none());
        remove(gmr.id());
    }
}
