//! An in-process, multi-threaded implementation of [`Substrate`] that simulates a
//! cluster of peer processes as OS threads sharing one address space. It exists so
//! that the rest of the crate can be exercised deterministically without an external
//! MPI installation — the out-of-scope "process launch and underlying transport"
//! collaborator, stood up locally for tests and benchmarks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use super::{AccOp, MemoryModel, ReduceOp, Substrate, WindowId};
use crate::datatype::Datatype;
use crate::error::{Errno, Result};
use crate::os::{CvarMutex, Condvar, HashMap};

/// State shared by every communicator carved out of the same simulated cluster.
struct World {
    next_window_id: AtomicU64,
    windows: CvarMutex<HashMap<WindowId, Arc<WindowState>>>,
    split_slots: CvarMutex<HashMap<Vec<usize>, Arc<SplitSlot>>>,
}

/// Rendezvous point for one in-flight `split()` over a specific member set: exactly
/// one participant (local rank 0 of the new communicator) builds the shared
/// [`CommState`]; everyone else blocks on the same barrier until it is published.
struct SplitSlot {
    rendezvous: Rendezvous,
    comm: CvarMutex<Option<Arc<CommState>>>,
}

struct WindowState {
    slices: Vec<CvarMutex<Box<[u8]>>>,
    model: MemoryModel,
}

struct Msg {
    source: usize,
    tag: u32,
    data: Vec<u8>,
}

struct Mailbox {
    queue: SegQueue<Msg>,
    doorbell: CvarMutex<u64>,
    cv: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            doorbell: CvarMutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn push(&self, m: Msg) {
        self.queue.push(m);
        let mut g = self.doorbell.lock().unwrap();
        *g = g.wrapping_add(1);
        self.cv.notify_all();
    }

    fn try_take(&self, source: Option<usize>, tag: u32) -> Option<(usize, Vec<u8>)> {
        let mut stash = Vec::new();
        let mut found = None;
        while let Some(m) = self.queue.pop() {
            if found.is_none() && m.tag == tag && source.map_or(true, |s| s == m.source) {
                found = Some((m.source, m.data));
            } else {
                stash.push(m);
            }
        }
        for m in stash {
            self.queue.push(m);
        }
        found
    }

    fn recv(&self, source: Option<usize>, tag: u32) -> (usize, Vec<u8>) {
        loop {
            if let Some(found) = self.try_take(source, tag) {
                return found;
            }
            let guard = self.doorbell.lock().unwrap();
            let seen = *guard;
            let (_guard, _timed_out) = self
                .cv
                .wait_timeout_while(guard, Duration::from_millis(5), |v| *v == seen)
                .unwrap();
            drop(_guard);
        }
    }
}

/// A generic gather-and-release rendezvous: every participant contributes a byte
/// payload and blocks until all participants have contributed, then every participant
/// receives every payload (in participant order). Reused for every collective
/// operation in sequence, matching the real-MPI contract that collectives on one
/// communicator must be issued by every member in the same relative order.
struct Rendezvous {
    n: usize,
    state: CvarMutex<RendState>,
    cv: Condvar,
}

struct RendState {
    generation: u64,
    arrived: usize,
    payloads: Vec<Option<Vec<u8>>>,
}

impl Rendezvous {
    fn new(n: usize) -> Self {
        Self {
            n,
            state: CvarMutex::new(RendState {
                generation: 0,
                arrived: 0,
                payloads: vec![None; n],
            }),
            cv: Condvar::new(),
        }
    }

    fn gather_all(&self, local_rank: usize, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let mut g = self.state.lock().unwrap();
        let my_gen = g.generation;
        g.payloads[local_rank] = Some(payload);
        g.arrived += 1;
        if g.arrived == self.n {
            g.arrived = 0;
            g.generation += 1;
            self.cv.notify_all();
        } else {
            g = self.cv.wait_while(g, |s| s.generation == my_gen).unwrap();
        }
        g.payloads.iter().map(|p| p.clone().unwrap()).collect()
    }
}

/// A communicator: a membership list (world ranks, ascending) plus the rendezvous and
/// messaging state shared by its members.
struct CommState {
    world_ranks: Vec<usize>,
    rendezvous: Rendezvous,
    mailboxes: Vec<Mailbox>,
}

pub struct LocalSubstrate {
    world: Arc<World>,
    comm: Arc<CommState>,
    local_rank: usize,
}

impl LocalSubstrate {
    /// Build a simulated cluster of `n` peer processes, returning one handle per rank
    /// (hand each to its own thread).
    pub fn world(n: usize) -> Vec<Arc<dyn Substrate>> {
        assert!(n > 0, "a simulated cluster needs at least one rank");
        let world = Arc::new(World {
            next_window_id: AtomicU64::new(1),
            windows: CvarMutex::new(HashMap::default()),
            split_slots: CvarMutex::new(HashMap::default()),
        });
        let comm = Arc::new(CommState {
            world_ranks: (0..n).collect(),
            rendezvous: Rendezvous::new(n),
            mailboxes: (0..n).map(|_| Mailbox::new()).collect(),
        });
        (0..n)
            .map(|r| {
                Arc::new(LocalSubstrate {
                    world: world.clone(),
                    comm: comm.clone(),
                    local_rank: r,
                }) as Arc<dyn Substrate>
            })
            .collect()
    }

    fn window(&self, win: WindowId) -> Result<Arc<WindowState>> {
        self.world
            .windows
            .lock()
            .unwrap()
            .get(&win)
            .cloned()
            .ok_or_else(|| {
                crate::error::Error::with_msg(Errno::SubstrateError, format!("unknown window {win}"))
            })
    }

    fn reduce_combine(dt: Datatype, op: ReduceOp, values: &[Vec<u8>], out: &mut [u8]) -> Result<()> {
        if op == ReduceOp::AbsMin || op == ReduceOp::AbsMax {
            crate::return_errno_with_msg!(
                Errno::UnknownReductionOperator,
                "absmin/absmax are reserved and not implemented"
            );
        }
        let count = dt.count_in(out.len())?;
        macro_rules! combine_numeric {
            ($t:ty, $sz:expr, $from:expr) => {{
                for i in 0..count {
                    let mut acc: $t = $from(&values[0][i * $sz..i * $sz + $sz]);
                    for v in &values[1..] {
                        let x: $t = $from(&v[i * $sz..i * $sz + $sz]);
                        acc = match op {
                            ReduceOp::Sum => acc + x,
                            ReduceOp::Prod => acc * x,
                            ReduceOp::Min => if x < acc { x } else { acc },
                            ReduceOp::Max => if x > acc { x } else { acc },
                            ReduceOp::AbsMin | ReduceOp::AbsMax => unreachable!(),
                        };
                    }
                    out[i * $sz..i * $sz + $sz].copy_from_slice(&acc.to_ne_bytes());
                }
            }};
        }
        match dt {
            Datatype::I32 => combine_numeric!(i32, 4, |b: &[u8]| i32::from_ne_bytes(b.try_into().unwrap())),
            Datatype::I64 => combine_numeric!(i64, 8, |b: &[u8]| i64::from_ne_bytes(b.try_into().unwrap())),
            Datatype::F32 => combine_numeric!(f32, 4, |b: &[u8]| f32::from_ne_bytes(b.try_into().unwrap())),
            Datatype::F64 => combine_numeric!(f64, 8, |b: &[u8]| f64::from_ne_bytes(b.try_into().unwrap())),
            Datatype::Cplx32 | Datatype::Cplx64 => crate::return_errno_with_msg!(
                Errno::UnknownReductionOperator,
                "reductions over complex datatypes are not supported"
            ),
        }
        Ok(())
    }
}

impl Substrate for LocalSubstrate {
    fn rank(&self) -> usize {
        self.local_rank
    }

    fn size(&self) -> usize {
        self.comm.world_ranks.len()
    }

    fn memory_model(&self) -> MemoryModel {
        // All ranks live in one address space; RMA writes are visible to a subsequent
        // local load the moment the lock guarding the slice is released.
        MemoryModel::Unified
    }

    fn create_window(&self, local_bytes: usize) -> Result<WindowId> {
        let sizes = self.comm.rendezvous.gather_all(self.local_rank, local_bytes.to_ne_bytes().to_vec());
        if self.local_rank == 0 {
            let slices = sizes
                .iter()
                .map(|b| {
                    let n = usize::from_ne_bytes(b.as_slice().try_into().unwrap());
                    CvarMutex::new(vec![0u8; n].into_boxed_slice())
                })
                .collect::<Vec<_>>();
            let id = self.world.next_window_id.fetch_add(1, Ordering::SeqCst);
            self.world.windows.lock().unwrap().insert(
                id,
                Arc::new(WindowState {
                    slices,
                    model: MemoryModel::Unified,
                }),
            );
            let ids = self
                .comm
                .rendezvous
                .gather_all(self.local_rank, id.to_ne_bytes().to_vec());
            Ok(u64::from_ne_bytes(ids[0].as_slice().try_into().unwrap()))
        } else {
            let ids = self
                .comm
                .rendezvous
                .gather_all(self.local_rank, 0u64.to_ne_bytes().to_vec());
            Ok(u64::from_ne_bytes(ids[0].as_slice().try_into().unwrap()))
        }
    }

    fn free_window(&self, win: WindowId) -> Result<()> {
        self.comm.rendezvous.gather_all(self.local_rank, Vec::new());
        if self.local_rank == 0 {
            self.world.windows.lock().unwrap().remove(&win);
        }
        self.comm.rendezvous.gather_all(self.local_rank, Vec::new());
        Ok(())
    }

    fn window_local_size(&self, win: WindowId, target: usize) -> Result<usize> {
        let w = self.window(win)?;
        Ok(w.slices[target].lock().unwrap().len())
    }

    fn put(&self, win: WindowId, target: usize, offset: usize, src: &[u8]) -> Result<()> {
        let w = self.window(win)?;
        let mut slot = w.slices[target].lock().unwrap();
        check_range(slot.len(), offset, src.len())?;
        slot[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn get(&self, win: WindowId, target: usize, offset: usize, dst: &mut [u8]) -> Result<()> {
        let w = self.window(win)?;
        let slot = w.slices[target].lock().unwrap();
        check_range(slot.len(), offset, dst.len())?;
        dst.copy_from_slice(&slot[offset..offset + dst.len()]);
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
    ) -> Result<()> {
        let w = self.window(win)?;
        let mut slot = w.slices[target].lock().unwrap();
        check_range(slot.len(), offset, src.len())?;
        apply_acc(&mut slot[offset..offset + src.len()], src, dt, op)
    }

    fn get_accumulate(
        &self,
        win: WindowId,
        target: usize,
        offset: usize,
        src: &[u8],
        out: &mut [u8],
        dt: Datatype,
        op: AccOp,
    ) -> Result<()> {
        let w = self.window(win)?;
        let mut slot = w.slices[target].lock().unwrap();
        check_range(slot.len(), offset, src.len())?;
        out.copy_from_slice(&slot[offset..offset + src.len()]);
        apply_acc(&mut slot[offset..offset + src.len()], src, dt, op)
    }

    fn flush_local(&self, _win: WindowId, _target: usize) -> Result<()> {
        Ok(())
    }

    fn flush(&self, _win: WindowId, _target: usize) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.comm.rendezvous.gather_all(self.local_rank, Vec::new());
        Ok(())
    }

    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<()> {
        let payload = if self.local_rank == root { buf.to_vec() } else { Vec::new() };
        let all = self.comm.rendezvous.gather_all(self.local_rank, payload);
        buf.copy_from_slice(&all[root]);
        Ok(())
    }

    fn allreduce(&self, send: &[u8], recv: &mut [u8], dt: Datatype, op: ReduceOp) -> Result<()> {
        let all = self.comm.rendezvous.gather_all(self.local_rank, send.to_vec());
        Self::reduce_combine(dt, op, &all, recv)
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<()> {
        let all = self.comm.rendezvous.gather_all(self.local_rank, send.to_vec());
        let chunk = send.len();
        for (i, v) in all.iter().enumerate() {
            recv[i * chunk..i * chunk + chunk].copy_from_slice(v);
        }
        Ok(())
    }

    fn send(&self, dest: usize, tag: u32, data: &[u8]) -> Result<()> {
        self.comm.mailboxes[dest].push(Msg {
            source: self.local_rank,
            tag,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn recv(&self, source: Option<usize>, tag: u32) -> Result<(usize, Vec<u8>)> {
        Ok(self.comm.mailboxes[self.local_rank].recv(source, tag))
    }

    fn put_then_get_row(
        &self,
        win: WindowId,
        target: usize,
        put_offset: usize,
        byte: u8,
        row_start: usize,
        row_len: usize,
    ) -> Result<Vec<u8>> {
        let w = self.window(win)?;
        let mut slot = w.slices[target].lock().unwrap();
        check_range(slot.len(), put_offset, 1)?;
        slot[put_offset] = byte;
        check_range(slot.len(), row_start, row_len)?;
        Ok(slot[row_start..row_start + row_len].to_vec())
    }

    fn split(&self, members: &[usize]) -> Result<Arc<dyn Substrate>> {
        debug_assert!(members.windows(2).all(|w| w[0] < w[1]), "members must be ascending");
        let key = members.to_vec();
        let slot = {
            let mut table = self.world.split_slots.lock().unwrap();
            table
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(SplitSlot {
                        rendezvous: Rendezvous::new(members.len()),
                        comm: CvarMutex::new(None),
                    })
                })
                .clone()
        };
        let my_world_rank = self.comm.world_ranks[self.local_rank];
        let my_local = members
            .iter()
            .position(|&r| r == my_world_rank)
            .expect("split() called by a non-member");
        let n = members.len();

        if my_local == 0 {
            *slot.comm.lock().unwrap() = Some(Arc::new(CommState {
                world_ranks: members.to_vec(),
                rendezvous: Rendezvous::new(n),
                mailboxes: (0..n).map(|_| Mailbox::new()).collect(),
            }));
        }
        // Every participant passes through this barrier; since rank 0 only reaches it
        // after publishing `comm`, every participant observes it populated afterwards.
        slot.rendezvous.gather_all(my_local, Vec::new());
        let new_comm = slot.comm.lock().unwrap().clone().unwrap();
        self.world.split_slots.lock().unwrap().remove(&key);

        Ok(Arc::new(LocalSubstrate {
            world: self.world.clone(),
            comm: new_comm,
            local_rank: my_local,
        }))
    }

    fn dup(&self) -> Result<Arc<dyn Substrate>> {
        let key: Vec<usize> = self.comm.world_ranks.clone();
        // `dup` is collective over the whole existing communicator, which is exactly
        // a `split` over its full membership: reuse the same rendezvous machinery.
        self.split(&key)
    }

    fn world_ranks(&self) -> &[usize] {
        &self.comm.world_ranks
    }
}

fn check_range(len: usize, offset: usize, n: usize) -> Result<()> {
    if offset.checked_add(n).map_or(true, |end| end > len) {
        crate::return_errno_with_msg!(
            Errno::OutOfRange,
            "offset {offset} + length {n} exceeds window slice of size {len}"
        );
    }
    Ok(())
}

fn apply_acc(dst: &mut [u8], src: &[u8], dt: Datatype, op: AccOp) -> Result<()> {
    match op {
        AccOp::Replace => {
            dst.copy_from_slice(src);
            Ok(())
        }
        AccOp::NoOp => Ok(()),
        AccOp::Sum => {
            // Operate on the underlying real components: for the complex datatypes a
            // componentwise real sum over (re, im) pairs *is* complex addition, so
            // there is no need to special-case them beyond the component width.
            let comp_size: usize = match dt {
                Datatype::I32 | Datatype::F32 | Datatype::Cplx32 => 4,
                Datatype::I64 | Datatype::F64 | Datatype::Cplx64 => 8,
            };
            if src.len() % comp_size != 0 {
                crate::return_errno_with_msg!(
                    Errno::MisalignedSize,
                    "byte length {} is not a multiple of component size {comp_size}",
                    src.len()
                );
            }
            let count = src.len() / comp_size;
            macro_rules! sum_numeric {
                ($t:ty, $sz:expr) => {{
                    for i in 0..count {
                        let a = <$t>::from_ne_bytes(dst[i * $sz..i * $sz + $sz].try_into().unwrap());
                        let b = <$t>::from_ne_bytes(src[i * $sz..i * $sz + $sz].try_into().unwrap());
                        dst[i * $sz..i * $sz + $sz].copy_from_slice(&(a + b).to_ne_bytes());
                    }
                }};
            }
            match dt {
                Datatype::I32 => sum_numeric!(i32, 4),
                Datatype::I64 => sum_numeric!(i64, 8),
                Datatype::F32 | Datatype::Cplx32 => sum_numeric!(f32, 4),
                Datatype::F64 | Datatype::Cplx64 => sum_numeric!(f64, 8),
            }
            Ok(())
        }
    }
}
