//! C7: the RMA engine — contiguous, strided, IOV, and read-modify-write operations,
//! tying the registry, guard, and substrate layers together (§4.3–§4.6).
//!
//! Every entry point resolves its remote address through [`crate::gmr::registry`],
//! translates the owning world rank into the allocation's own communicator-local
//! rank, validates the displacement against that rank's slice, and issues one or
//! more [`Substrate`] calls followed by a flush. Contract violations — an address
//! that resolves to no known allocation, or a displacement that runs past the end
//! of the target's slice — are `Result` errors here, not `fatal!`, matching §7
//! ("recoverable where the interface allows").

use std::sync::Arc;

use crate::config;
use crate::datatype::Datatype;
use crate::error::{Errno, Result};
use crate::gmr::{registry, Gmr};
use crate::guard;
use crate::iov::{self, IovEntry, IovMethod};
use crate::scale::{self, Scale};
use crate::strided::{self, StrideShape, StridedMethod};
use crate::substrate::{AccOp, Substrate, WindowId};

/// A resolved remote address: the allocation it belongs to, the displacement from
/// that rank's slice base, and the rank translated into the allocation's own
/// communicator-local numbering (what [`Substrate`] methods expect).
struct Resolved {
    gmr: Arc<Gmr>,
    local_rank: usize,
    disp: usize,
}

fn resolve(target_world_rank: usize, addr: usize, len: usize) -> Result<Resolved> {
    let gmr = registry::lookup(target_world_rank, addr).ok_or_else(|| {
        crate::error::Error::with_msg(
            Errno::InvalidRemotePointer,
            format!("address {addr:#x} on rank {target_world_rank} is not within any known allocation"),
        )
    })?;
    let slice = gmr.slices()[target_world_rank];
    let disp = addr - slice.base;
    if disp.checked_add(len).map_or(true, |end| end > slice.size) {
        crate::return_errno_with_msg!(
            Errno::OutOfRange,
            "displacement {disp} + length {len} exceeds target slice of size {}",
            slice.size
        );
    }
    let local_rank = gmr.local_rank_of(target_world_rank).ok_or_else(|| {
        crate::error::Error::with_msg(
            Errno::InvalidRemotePointer,
            format!("rank {target_world_rank} is not a member of the owning allocation's group"),
        )
    })?;
    Ok(Resolved { gmr, local_rank, disp })
}

fn win_of(r: &Resolved) -> WindowId {
    r.gmr.window()
}

fn sub_of(r: &Resolved) -> &Arc<dyn Substrate> {
    r.gmr.substrate()
}

/// Whether the process-wide `no_flush_local` state (§3, §4.3 "flush and completion")
/// is set, eliding the local flush after a blocking put/accumulate. Independent of
/// the origin-guard policy (`ShrBufMethod`, C4), which governs whether a non-identity
/// accumulate is staged through a private buffer, not whether the local flush runs.
fn no_flush_local() -> Result<bool> {
    config::with(|c| c.no_flush_local)
}

/// Issue the local-completion flush after a blocking put/accumulate, unless
/// `no_flush_local` elides it.
fn maybe_flush_local(r: &Resolved) -> Result<()> {
    if !no_flush_local()? {
        sub_of(r).flush_local(win_of(r), r.local_rank)?;
    }
    Ok(())
}

/// §4.3 contiguous put. `dst_addr` is an address previously returned by
/// [`crate::gmr::create`] (or derived from one by pointer arithmetic within the
/// same slice).
pub fn put(target: usize, dst_addr: usize, src: &[u8]) -> Result<()> {
    let r = resolve(target, dst_addr, src.len())?;
    sub_of(&r).put(win_of(&r), r.local_rank, r.disp, src)?;
    maybe_flush_local(&r)
}

/// §4.3 contiguous get, the dual of [`put`].
pub fn get(target: usize, src_addr: usize, dst: &mut [u8]) -> Result<()> {
    let r = resolve(target, src_addr, dst.len())?;
    sub_of(&r).get(win_of(&r), r.local_rank, r.disp, dst)?;
    sub_of(&r).flush(win_of(&r), r.local_rank)?;
    Ok(())
}

/// §4.3 typed accumulate with an optional scalar multiply. A non-identity scale is
/// staged through a private buffer under the single process-wide local-access
/// epoch (§4.3 "local access epochs"; see `guard.rs`).
pub fn acc(target: usize, dst_addr: usize, dt: Datatype, scale_factor: Scale, src: &[u8]) -> Result<()> {
    let r = resolve(target, dst_addr, src.len())?;
    if scale_factor.is_identity(dt) {
        sub_of(&r).accumulate(win_of(&r), r.local_rank, r.disp, src, dt, AccOp::Sum)?;
    } else {
        let _epoch = guard::access_begin()?;
        let mut scaled = vec![0u8; src.len()];
        scale::apply(dt, scale_factor, src, &mut scaled)?;
        sub_of(&r).accumulate(win_of(&r), r.local_rank, r.disp, &scaled, dt, AccOp::Sum)?;
    }
    maybe_flush_local(&r)
}

/// §4.3 `get_acc`, the fetch-and-update dual of [`acc`] (present in the original's
/// `gmr-extras.c`; reintroduced here because the RMW fast path below needs it).
pub fn get_acc(target: usize, dst_addr: usize, dt: Datatype, op: AccOp, src: &[u8], out: &mut [u8]) -> Result<()> {
    if out.len() != src.len() {
        crate::return_errno_with_msg!(Errno::MisalignedSize, "get_acc: out and src buffers differ in length");
    }
    let r = resolve(target, dst_addr, src.len())?;
    sub_of(&r).get_accumulate(win_of(&r), r.local_rank, r.disp, src, out, dt, op)?;
    sub_of(&r).flush(win_of(&r), r.local_rank)?;
    Ok(())
}

/// §4.6 read-modify-write operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    FetchAddI32,
    FetchAddI64,
    SwapI32,
    SwapI64,
}

impl RmwOp {
    fn datatype(self) -> Datatype {
        match self {
            RmwOp::FetchAddI32 | RmwOp::SwapI32 => Datatype::I32,
            RmwOp::FetchAddI64 | RmwOp::SwapI64 => Datatype::I64,
        }
    }

    fn acc_op(self) -> AccOp {
        match self {
            RmwOp::FetchAddI32 | RmwOp::FetchAddI64 => AccOp::Sum,
            RmwOp::SwapI32 | RmwOp::SwapI64 => AccOp::Replace,
        }
    }
}

/// `rmw` always takes the native get-accumulate fast path (§4.6): no mutex
/// round-trip, and no dependency from the RMA engine back onto the mutex layer.
pub fn rmw(op: RmwOp, target: usize, addr: usize, value: &[u8]) -> Result<Vec<u8>> {
    let dt = op.datatype();
    if value.len() != dt.size() {
        crate::return_errno_with_msg!(
            Errno::MisalignedSize,
            "rmw value is {} bytes, expected {} for {dt:?}",
            value.len(),
            dt.size()
        );
    }
    let mut out = vec![0u8; value.len()];
    get_acc(target, addr, dt, op.acc_op(), value, &mut out)?;
    Ok(out)
}

/// §4.3 local access epoch. Only meaningful around non-RMA direct local
/// load/store of a GMR slice the caller owns; this crate's public surface never
/// exposes such raw access (see `guard.rs`), so this is a thin re-export of
/// [`guard::access_begin`] for symmetry with the original interface.
pub fn access_begin() -> Result<guard::LocalAccessEpoch> {
    guard::access_begin()
}

/// Nonblocking contiguous put: issues the transfer but defers the completion flush
/// to a later `wait`/`wait_all`/`flush_by_proc` call (see `nonblocking.rs`).
pub fn put_nb(target: usize, dst_addr: usize, src: &[u8]) -> Result<()> {
    let r = resolve(target, dst_addr, src.len())?;
    sub_of(&r).put(win_of(&r), r.local_rank, r.disp, src)
}

/// Nonblocking contiguous get, the dual of [`put_nb`].
pub fn get_nb(target: usize, src_addr: usize, dst: &mut [u8]) -> Result<()> {
    let r = resolve(target, src_addr, dst.len())?;
    sub_of(&r).get(win_of(&r), r.local_rank, r.disp, dst)
}

/// Nonblocking typed accumulate.
pub fn acc_nb(target: usize, dst_addr: usize, dt: Datatype, scale_factor: Scale, src: &[u8]) -> Result<()> {
    let r = resolve(target, dst_addr, src.len())?;
    if scale_factor.is_identity(dt) {
        sub_of(&r).accumulate(win_of(&r), r.local_rank, r.disp, src, dt, AccOp::Sum)
    } else {
        let _epoch = guard::access_begin()?;
        let mut scaled = vec![0u8; src.len()];
        scale::apply(dt, scale_factor, src, &mut scaled)?;
        sub_of(&r).accumulate(win_of(&r), r.local_rank, r.disp, &scaled, dt, AccOp::Sum)
    }
}

pub fn flush(target: usize, addr: usize) -> Result<()> {
    let r = resolve(target, addr, 0)?;
    sub_of(&r).flush(win_of(&r), r.local_rank)
}

pub fn flush_local(target: usize, addr: usize) -> Result<()> {
    let r = resolve(target, addr, 0)?;
    sub_of(&r).flush_local(win_of(&r), r.local_rank)
}

fn strided_method() -> Result<StridedMethod> {
    config::with(|c| match c.strided_method {
        config::StridedMethod::Direct => StridedMethod::Direct,
        config::StridedMethod::Iov => StridedMethod::Iov,
    })
}

fn iov_method() -> Result<IovMethod> {
    config::with(|c| IovMethod::from(c.iov_method))
}

fn shape_extent(shape: &StrideShape) -> usize {
    let blocks: usize = shape.count[1..].iter().product::<usize>().max(1);
    blocks * shape.count[0]
}

/// §4.4 strided put.
pub fn put_strided(target: usize, dst_addr: usize, src: &[u8], src_shape: &StrideShape, dst_shape: &StrideShape) -> Result<()> {
    let r = resolve(target, dst_addr, shape_extent(dst_shape))?;
    strided::put(sub_of(&r).as_ref(), win_of(&r), r.local_rank, src, src_shape, r.disp, dst_shape, strided_method()?)?;
    maybe_flush_local(&r)
}

/// §4.4 strided get.
pub fn get_strided(target: usize, src_addr: usize, dst: &mut [u8], src_shape: &StrideShape, dst_shape: &StrideShape) -> Result<()> {
    let r = resolve(target, src_addr, shape_extent(src_shape))?;
    strided::get(sub_of(&r).as_ref(), win_of(&r), r.local_rank, r.disp, src_shape, dst, dst_shape, strided_method()?)?;
    sub_of(&r).flush(win_of(&r), r.local_rank)
}

/// §4.4 strided accumulate.
pub fn acc_strided(
    target: usize,
    dst_addr: usize,
    dt: Datatype,
    scale_factor: Scale,
    src: &[u8],
    src_shape: &StrideShape,
    dst_shape: &StrideShape,
) -> Result<()> {
    let r = resolve(target, dst_addr, shape_extent(dst_shape))?;
    let _epoch = if scale_factor.is_identity(dt) { None } else { Some(guard::access_begin()?) };
    strided::acc(sub_of(&r).as_ref(), win_of(&r), r.local_rank, dt, scale_factor, src, src_shape, r.disp, dst_shape)?;
    maybe_flush_local(&r)
}

/// §4.4 `put_s_flag`: a strided put, then a fence on `target`, then a single
/// integer put of `value` into `flag_addr`. Whether the fence is actually issued is
/// governed by Open Question 2 in DESIGN.md: this build does not trust substrate
/// RMA ordering across the three steps, so it is never elided.
pub fn put_s_flag(
    target: usize,
    dst_addr: usize,
    src: &[u8],
    src_shape: &StrideShape,
    dst_shape: &StrideShape,
    flag_addr: usize,
    value: i64,
) -> Result<()> {
    put_strided(target, dst_addr, src, src_shape, dst_shape)?;
    let r = resolve(target, dst_addr, 0)?;
    sub_of(&r).flush(win_of(&r), r.local_rank)?;
    put(target, flag_addr, &value.to_ne_bytes())
}

/// §4.5 IOV put: every `(src_offset, dst_offset, len)` entry's `dst_offset` is
/// relative to `dst_base`; all entries must land in the same allocation (the
/// "same-allocation check").
pub fn put_iov(target: usize, dst_base: usize, src: &[u8], entries: &[IovEntry]) -> Result<()> {
    let extent = entries.iter().map(|e| e.dst_offset + e.len).max().unwrap_or(0);
    let r = resolve(target, dst_base, extent)?;
    let shifted: Vec<IovEntry> = entries
        .iter()
        .map(|e| IovEntry { src_offset: e.src_offset, dst_offset: r.disp + e.dst_offset, len: e.len })
        .collect();
    iov::put(sub_of(&r).as_ref(), win_of(&r), r.local_rank, src, &shifted, iov_method()?)?;
    maybe_flush_local(&r)
}

/// §4.5 IOV get, the dual of [`put_iov`].
pub fn get_iov(target: usize, src_base: usize, dst: &mut [u8], entries: &[IovEntry]) -> Result<()> {
    let extent = entries.iter().map(|e| e.src_offset + e.len).max().unwrap_or(0);
    let r = resolve(target, src_base, extent)?;
    let shifted: Vec<IovEntry> = entries
        .iter()
        .map(|e| IovEntry { src_offset: r.disp + e.src_offset, dst_offset: e.dst_offset, len: e.len })
        .collect();
    iov::get(sub_of(&r).as_ref(), win_of(&r), r.local_rank, dst, &shifted, iov_method()?)?;
    sub_of(&r).flush(win_of(&r), r.local_rank)
}

/// §4.5 IOV accumulate.
pub fn acc_iov(
    target: usize,
    dst_base: usize,
    dt: Datatype,
    scale_factor: Scale,
    src: &[u8],
    entries: &[IovEntry],
) -> Result<()> {
    let extent = entries.iter().map(|e| e.dst_offset + e.len).max().unwrap_or(0);
    let r = resolve(target, dst_base, extent)?;
    let shifted: Vec<IovEntry> = entries
        .iter()
        .map(|e| IovEntry { src_offset: e.src_offset, dst_offset: r.disp + e.dst_offset, len: e.len })
        .collect();
    let _epoch = if scale_factor.is_identity(dt) { None } else { Some(guard::access_begin()?) };
    iov::acc(sub_of(&r).as_ref(), win_of(&r), r.local_rank, dt, scale_factor, src, &shifted, iov_method()?)?;
    maybe_flush_local(&r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use std::thread;

    fn with_config(f: impl FnOnce()) {
        config::set(config::Config::default());
        f();
        config::clear();
    }

    #[test]
    fn contiguous_put_get_round_trip() {
        with_config(|| {
            let subs = crate::substrate::LocalSubstrate::world(2);
            let handles: Vec<_> = subs
                .into_iter()
                .map(|s| {
                    thread::spawn(move || {
                        let g = Group::from_substrate(s, 2);
                        let (_handle, addrs) = crate::gmr::create(&g, 2, 32).unwrap();
                        g.substrate().barrier().unwrap();

                        if g.rank() == 0 {
                            put(1, addrs[1], &[9u8; 8]).unwrap();
                        }
                        g.substrate().barrier().unwrap();
                        if g.rank() == 1 {
                            let mut dst = [0u8; 8];
                            get(1, addrs[1], &mut dst).unwrap();
                            assert_eq!(dst, [9u8; 8]);
                        }
                        g.substrate().barrier().unwrap();
                        crate::gmr::destroy_all();
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    }

    #[test]
    fn rmw_fetch_add_sees_prior_value() {
        with_config(|| {
            let subs = crate::substrate::LocalSubstrate::world(2);
            let handles: Vec<_> = subs
                .into_iter()
                .map(|s| {
                    thread::spawn(move || {
                        let g = Group::from_substrate(s, 2);
                        let (_h, addrs) = crate::gmr::create(&g, 2, 4).unwrap();
                        g.substrate().barrier().unwrap();
                        if g.rank() == 0 {
                            put(1, addrs[1], &0i32.to_ne_bytes()).unwrap();
                        }
                        g.substrate().barrier().unwrap();
                        let prev =
                            rmw(RmwOp::FetchAddI32, 1, addrs[1], &(g.rank() as i32 + 1).to_ne_bytes()).unwrap();
                        let _ = i32::from_ne_bytes(prev.try_into().unwrap());
                        g.substrate().barrier().unwrap();
                        if g.rank() == 1 {
                            let mut out = [0u8; 4];
                            get(1, addrs[1], &mut out).unwrap();
                            assert_eq!(i32::from_ne_bytes(out), 3);
                        }
                        g.substrate().barrier().unwrap();
                        crate::gmr::destroy_all();
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    }

    #[test]
    fn strided_put_direct_and_iov_methods_agree() {
        with_config(|| {
            let subs = crate::substrate::LocalSubstrate::world(1);
            let s = subs.into_iter().next().unwrap();
            let g = Group::from_substrate(s, 1);
            let (_h, addrs) = crate::gmr::create(&g, 1, 32).unwrap();

            let src: Vec<u8> = (0..16u8).collect();
            let src_shape = StrideShape { count: vec![4, 4], stride: vec![4] };
            let dst_shape = StrideShape { count: vec![4, 4], stride: vec![8] };

            config::set(config::Config { strided_method: config::StridedMethod::Direct, ..config::Config::default() });
            put_strided(0, addrs[0], &src, &src_shape, &dst_shape).unwrap();
            let mut direct = vec![0u8; 32];
            get(0, addrs[0], &mut direct).unwrap();

            put(0, addrs[0], &vec![0u8; 32]).unwrap();
            config::set(config::Config { strided_method: config::StridedMethod::Iov, ..config::Config::default() });
            put_strided(0, addrs[0], &src, &src_shape, &dst_shape).unwrap();
            let mut flattened = vec![0u8; 32];
            get(0, addrs[0], &mut flattened).unwrap();

            assert_eq!(direct, flattened);
            crate::gmr::destroy_all();
        });
    }

    #[test]
    fn out_of_range_address_is_an_error() {
        with_config(|| {
            let subs = crate::substrate::LocalSubstrate::world(1);
            let s = subs.into_iter().next().unwrap();
            let g = Group::from_substrate(s, 1);
            let (_h, addrs) = crate::gmr::create(&g, 1, 8).unwrap();
            assert!(put(0, addrs[0] + 100, &[1u8]).is_err());
            crate::gmr::destroy_all();
        });
    }
}
