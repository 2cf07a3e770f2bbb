//! The `Substrate` trait: this crate's model of the external message-passing library
//! consumed by the runtime (§6 of the design). Process launch and the concrete
//! transport are out of scope; this trait is the seam between that external
//! collaborator and everything built on top of it.

mod local;

pub use local::LocalSubstrate;

use std::sync::Arc;

use crate::datatype::Datatype;
use crate::error::Result;

/// Opaque handle to a collectively created window.
pub type WindowId = u64;

/// Whether a window's public (RMA) and private (load/store) views of memory are
/// guaranteed to agree without explicit synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryModel {
    Unified,
    Separate,
}

/// Accumulate-family operators understood by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccOp {
    Sum,
    Replace,
    NoOp,
}

/// Reduction operators for `allreduce`. `AbsMin`/`AbsMax` are accepted by the type but
/// are not dispatched by the collectives layer (reserved, see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    AbsMin,
    AbsMax,
}

/// The operations a one-sided, group-based message-passing substrate must provide.
///
/// Every method is potentially blocking; collective methods (marked below) must be
/// called by every member of the substrate's group, in the same order, or the group
/// deadlocks — exactly as with a real MPI communicator.
pub trait Substrate: Send + Sync {
    /// This process's rank within the substrate's group.
    fn rank(&self) -> usize;

    /// The number of processes in the substrate's group.
    fn size(&self) -> usize;

    fn memory_model(&self) -> MemoryModel;

    /// Collectively create a window with `local_bytes` bytes of local contribution
    /// (may be zero). Returns the same [`WindowId`] on every member.
    fn create_window(&self, local_bytes: usize) -> Result<WindowId>;

    /// Collectively free a window.
    fn free_window(&self, win: WindowId) -> Result<()>;

    /// Size in bytes of `target`'s contribution to `win`.
    fn window_local_size(&self, win: WindowId, target: usize) -> Result<usize>;

    fn put(&self, win: WindowId, target: usize, offset: usize, src: &[u8]) -> Result<()>;
    fn get(&self, win: WindowId, target: usize, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Vectored put: `segments` pairs a target offset with the bytes to write there.
    /// Conceptually a single message carrying every segment (the datatype-gather
    /// strategy of §4.4/§4.5); the default implementation issues one `put` per
    /// segment, which is observably identical but not a single message.
    fn put_v(&self, win: WindowId, target: usize, segments: &[(usize, &[u8])]) -> Result<()> {
        for &(offset, bytes) in segments {
            self.put(win, target, offset, bytes)?;
        }
        Ok(())
    }

    /// Vectored get, the dual of [`Substrate::put_v`].
    fn get_v(&self, win: WindowId, target: usize, segments: &mut [(usize, &mut [u8])]) -> Result<()> {
        for (offset, bytes) in segments.iter_mut() {
            self.get(win, target, *offset, bytes)?;
        }
        Ok(())
    }

    fn accumulate(
        &self,
        win: WindowId,
        target: usize,
        offset: usize,
        src: &[u8],
        dt: Datatype,
        op: AccOp,
    ) -> Result<()>;

    /// Fetch-and-update: `out` receives the pre-update value, then `op` is applied at
    /// the target atomically with respect to other accumulate-family operations.
    fn get_accumulate(
        &self,
        win: WindowId,
        target: usize,
        offset: usize,
        src: &[u8],
        out: &mut [u8],
        dt: Datatype,
        op: AccOp,
    ) -> Result<()>;

    /// Local completion: the origin buffer of prior operations to `target` may be reused.
    fn flush_local(&self, win: WindowId, target: usize) -> Result<()>;

    /// Remote completion: prior operations to `target` are visible at the target.
    fn flush(&self, win: WindowId, target: usize) -> Result<()>;

    /// Collective barrier over the substrate's group.
    fn barrier(&self) -> Result<()>;

    /// Collective broadcast of `buf` from `root` to every member.
    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<()>;

    /// Collective all-reduce: every member contributes `send`, every member receives
    /// the combined result in `recv` (same length as `send`).
    fn allreduce(&self, send: &[u8], recv: &mut [u8], dt: Datatype, op: ReduceOp) -> Result<()>;

    /// Collective all-gather: `recv` must be `send.len() * size()` bytes, and receives
    /// every rank's `send` buffer back to back, in rank order.
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<()>;

    /// Two-sided blocking send.
    fn send(&self, dest: usize, tag: u32, data: &[u8]) -> Result<()>;

    /// Two-sided blocking receive. `source = None` matches any sender; returns the
    /// actual source rank alongside the payload.
    fn recv(&self, source: Option<usize>, tag: u32) -> Result<(usize, Vec<u8>)>;

    /// Atomically write `byte` at `put_offset`, then read back `row_len` bytes starting
    /// at `row_start`, as a single critical section on `target`'s slice. Models the
    /// original's lock/unlock-bracketed put-then-get pattern (§4.8's queue mutex is
    /// the only caller); a non-atomic sequential put-then-get would let two lockers
    /// each observe the other's byte as still unset.
    fn put_then_get_row(
        &self,
        win: WindowId,
        target: usize,
        put_offset: usize,
        byte: u8,
        row_start: usize,
        row_len: usize,
    ) -> Result<Vec<u8>>;

    /// Collectively construct a new substrate scoped to `members` (absolute ranks in
    /// this substrate's group, ascending). Collective over `members` only.
    fn split(&self, members: &[usize]) -> Result<Arc<dyn Substrate>>;

    /// Duplicate this substrate: same membership, but with an independent message
    /// space so that two-sided traffic on the duplicate never collides with traffic
    /// on the original. Collective over the whole group.
    fn dup(&self) -> Result<Arc<dyn Substrate>>;

    /// The absolute (world-communicator) rank corresponding to each local rank of
    /// this substrate's group, ascending. `world_ranks()[self.rank()]` is this
    /// process's own world rank. Used by [`crate::group`] to build rank-translation
    /// caches without every substrate implementation having to cross-reference
    /// other trait objects directly.
    fn world_ranks(&self) -> &[usize];
}
