//! C2/C3: Global Memory Regions — collective allocation, the registry, and the
//! per-allocation window-attribute bookkeeping.

pub mod registry;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pod::Pod;
use static_assertions::const_assert_eq;

use crate::config::ShrBufMethod;
use crate::datatype::Datatype;
use crate::error::{Errno, Result};
use crate::group::Group;
use crate::substrate::{MemoryModel, ReduceOp, Substrate, WindowId};

pub use registry::GmrId;

/// One process's contribution to a collective allocation: the wire-layout record
/// exchanged verbatim by the all-to-all step of `create` (§4.2 step 3).
#[repr(C)]
#[derive(Clone, Copy, Pod, PartialEq, Eq, Debug)]
pub struct Slice {
    pub base: usize,
    pub size: usize,
}

// Exchanged byte-for-byte over `allgather`; every member must agree on its width.
const_assert_eq!(core::mem::size_of::<Slice>(), 2 * core::mem::size_of::<usize>());

/// An opaque, copyable reference to a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GmrHandle(pub(crate) GmrId);

/// A single, process-wide, collision-free address space backs every allocation in
/// this simulated cluster (every rank is a thread in the same OS process); a real
/// multi-process deployment would instead rely on each rank's own independent
/// virtual address space, which this stands in for.
static NEXT_ADDR: AtomicUsize = AtomicUsize::new(0x1_0000);

fn alloc_local_base(size: usize) -> usize {
    debug_assert!(size > 0);
    let aligned = (size + 63) & !63;
    NEXT_ADDR.fetch_add(aligned, Ordering::SeqCst)
}

pub struct Gmr {
    id: GmrId,
    window: WindowId,
    /// World ranks of the allocating group's members, ascending (group-local order).
    members: Vec<usize>,
    /// World-indexed; non-members read as `{base: 0, size: 0}`.
    slices: Vec<Slice>,
    unified_model: bool,
    substrate: Arc<dyn Substrate>,
}

impl Gmr {
    pub fn id(&self) -> GmrId {
        self.id
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn unified_model(&self) -> bool {
        self.unified_model
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    pub fn local_rank_of(&self, world_rank: usize) -> Option<usize> {
        self.members.iter().position(|&r| r == world_rank)
    }

    pub(crate) fn member_slices(&self) -> impl Iterator<Item = (usize, Slice)> + '_ {
        self.members.iter().map(move |&w| (w, self.slices[w]))
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        id: GmrId,
        window: WindowId,
        slices_by_member: Vec<Slice>,
        substrate: Arc<dyn Substrate>,
    ) -> Self {
        let members: Vec<usize> = (0..slices_by_member.len()).collect();
        Self {
            id,
            window,
            members,
            slices: slices_by_member,
            unified_model: true,
            substrate,
        }
    }
}

/// Collective allocation (§4.2). `world_size` is the size of the process-wide world
/// group, used to size the world-indexed slice table. Returns the handle and one
/// address per member of `group`, in `group`'s local rank order.
pub fn create(group: &Group, world_size: usize, local_size: usize) -> Result<(GmrHandle, Vec<usize>)> {
    let sub = group.substrate();

    let mut max_buf = [0u8; 8];
    sub.allreduce(
        &(local_size as i64).to_ne_bytes(),
        &mut max_buf,
        Datatype::I64,
        ReduceOp::Max,
    )?;
    let max_local = i64::from_ne_bytes(max_buf) as usize;

    let window = sub.create_window(local_size)?;

    let my_base = if local_size == 0 { 0 } else { alloc_local_base(local_size) };
    let my_slice = Slice { base: my_base, size: local_size };
    let slice_bytes = core::mem::size_of::<Slice>();
    let mut recv = vec![0u8; slice_bytes * sub.size()];
    sub.allgather(my_slice.as_bytes(), &mut recv)?;

    let members = sub.world_ranks().to_vec();
    let mut slices = vec![Slice { base: 0, size: 0 }; world_size];
    for (local, &world_rank) in members.iter().enumerate() {
        slices[world_rank] = *Slice::from_bytes(&recv[local * slice_bytes..(local + 1) * slice_bytes]);
    }

    if max_local == 0 {
        log::debug!("gmr create: every member contributed zero bytes");
    }

    if sub.memory_model() == MemoryModel::Separate {
        crate::config::with(|cfg| {
            if cfg.shr_buf_method == ShrBufMethod::NoGuard {
                log::warn!("NOGUARD requested on a separate-memory-model window; reads/writes may race with RMA");
            }
        })?;
    }

    let id = registry::fresh_id();
    let unified_model = sub.memory_model() == MemoryModel::Unified;
    let addrs: Vec<usize> = members.iter().map(|&w| slices[w].base).collect();
    let gmr = Arc::new(Gmr {
        id,
        window,
        members,
        slices,
        unified_model,
        substrate: sub.clone(),
    });
    log::debug!("gmr {id} created with {} members", gmr.members.len());
    registry::insert(gmr);

    Ok((GmrHandle(id), addrs))
}

/// Collective destruction (§4.2). `handle` may be `None` — the allocation is then
/// resolved by consensus over whatever the other callers do know, exactly as the
/// original implementation tolerates a null pointer at `free`. Always collective,
/// even when every caller passes `None` (see DESIGN.md, Open Question 1).
pub fn destroy(group: &Group, handle: Option<GmrHandle>) -> Result<()> {
    let sub = group.substrate();

    let (owner, base) = match handle {
        Some(GmrHandle(id)) => {
            let gmr = registry::by_id(id).ok_or_else(|| {
                crate::error::Error::with_msg(Errno::InvalidRemotePointer, format!("destroy: unknown gmr {id}"))
            })?;
            let owner = gmr.members[0];
            (owner as i64, gmr.slices[owner].base as i64)
        }
        None => (-1, -1),
    };

    let mut send = [0u8; 16];
    send[0..8].copy_from_slice(&owner.to_ne_bytes());
    send[8..16].copy_from_slice(&base.to_ne_bytes());
    let mut recv = [0u8; 16];
    sub.allreduce(&send, &mut recv, Datatype::I64, ReduceOp::Max)?;
    let owner = i64::from_ne_bytes(recv[0..8].try_into().unwrap());
    let base = i64::from_ne_bytes(recv[8..16].try_into().unwrap());

    if owner < 0 {
        log::debug!("destroy: every caller passed None, nothing to free");
        return Ok(());
    }

    let gmr = match registry::lookup_for_destroy(owner as usize, base as usize) {
        Some(g) => g,
        None => crate::fatal!(
            Errno::InvalidRemotePointer,
            "destroy consensus named (owner={owner}, base={base}) but no live allocation matches"
        ),
    };
    sub.free_window(gmr.window())?;
    registry::remove(gmr.id());
    log::debug!("gmr {} destroyed", gmr.id());
    Ok(())
}

/// Tear down every allocation still alive (called by `finalize`). Returns the number
/// of leaked allocations freed; a nonzero count is logged as a warning by the caller.
pub fn destroy_all() -> usize {
    let all = registry::clear_all();
    let n = all.len();
    for gmr in all {
        let _ = gmr.substrate().free_window(gmr.window());
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn create_and_lookup_then_destroy() {
        let subs = crate::substrate::LocalSubstrate::world(2);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, 2);
                    let (handle, addrs) = create(&g, 2, 16).unwrap();
                    assert_eq!(addrs.len(), 2);
                    let my_world = g.to_world(g.rank());
                    let my_addr = addrs[g.rank()];
                    assert!(registry::lookup(my_world, my_addr).is_some());
                    assert!(registry::lookup(my_world, my_addr + 16).is_none());
                    g.substrate().barrier().unwrap();
                    destroy(&g, if g.rank() == 0 { Some(handle) } else { None }).unwrap();
                    assert!(registry::lookup(my_world, my_addr).is_none());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn zero_size_allocation_is_still_collective() {
        let subs = crate::substrate::LocalSubstrate::world(2);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, 2);
                    let (handle, addrs) = create(&g, 2, 0).unwrap();
                    assert_eq!(addrs, vec![0, 0]);
                    destroy(&g, if g.rank() == 0 { Some(handle) } else { None }).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
