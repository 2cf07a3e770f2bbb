//! C6/§4.5: the generalized I/O-vector engine.
//!
//! An IOV transfer names an arbitrary list of `(src_offset, dst_offset, len)`
//! segments with no shape in common (unlike [`crate::strided`], which requires a
//! nested-stride repetition). Three strategies are available, selected by
//! `IOV_METHOD` (§4.13):
//!
//! - `Safe`: one substrate call per segment, with an overlap check against every
//!   other segment's destination range first. Slowest, but correct even when the
//!   segments alias each other's destinations in equivalence-breaking ways.
//! - `OneLock`: the same per-segment calls, but without the overlap check — the
//!   caller is asserting the segments are disjoint.
//! - `Dtype`: a single vectored substrate call (the datatype-gather strategy),
//!   again without an overlap check.

use crate::conflict_tree::ConflictTree;
use crate::datatype::Datatype;
use crate::error::{Errno, Result};
use crate::scale::{self, Scale};
use crate::substrate::{AccOp, Substrate, WindowId};

/// One `(source offset, destination offset, length)` triple in an IOV transfer.
#[derive(Debug, Clone, Copy)]
pub struct IovEntry {
    pub src_offset: usize,
    pub dst_offset: usize,
    pub len: usize,
}

/// Above this many segments, overlap detection switches from the naive O(n^2)
/// pairwise scan to the balanced interval tree (§9 design notes).
const PAIRWISE_SCAN_THRESHOLD: usize = 32;

/// Which strategy to use. `Auto` should already have been resolved by the caller
/// (the RMA layer) before reaching here; it is accepted for completeness but just
/// behaves as `Dtype`, the fastest default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IovMethod {
    Safe,
    OneLock,
    Dtype,
}

impl From<crate::config::IovMethod> for IovMethod {
    fn from(m: crate::config::IovMethod) -> Self {
        match m {
            crate::config::IovMethod::Safe => IovMethod::Safe,
            crate::config::IovMethod::OneLock => IovMethod::OneLock,
            crate::config::IovMethod::Dtype | crate::config::IovMethod::Auto => IovMethod::Dtype,
        }
    }
}

/// Fail with [`Errno::SharedBufferConfigMismatch`] if any two destination ranges in
/// `entries` overlap. Used only by [`IovMethod::Safe`] (§4.5, "safe" mode).
pub fn check_disjoint(entries: &[IovEntry]) -> Result<()> {
    if entries.len() <= PAIRWISE_SCAN_THRESHOLD {
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let a = &entries[i];
                let b = &entries[j];
                if a.dst_offset < b.dst_offset + b.len && b.dst_offset < a.dst_offset + a.len {
                    crate::return_errno_with_msg!(
                        Errno::SharedBufferConfigMismatch,
                        "iov destination segments {i} and {j} overlap"
                    );
                }
            }
        }
        return Ok(());
    }

    let mut tree = ConflictTree::new();
    for (i, e) in entries.iter().enumerate() {
        if tree.insert(e.dst_offset, e.dst_offset + e.len) {
            crate::return_errno_with_msg!(
                Errno::SharedBufferConfigMismatch,
                "iov destination segment {i} overlaps a prior segment"
            );
        }
    }
    Ok(())
}

pub fn put(
    sub: &dyn Substrate,
    win: WindowId,
    target: usize,
    src: &[u8],
    entries: &[IovEntry],
    method: IovMethod,
) -> Result<()> {
    if method == IovMethod::Safe {
        check_disjoint(entries)?;
    }

    match method {
        IovMethod::Dtype => {
            let segments: Vec<(usize, &[u8])> = entries
                .iter()
                .map(|e| (e.dst_offset, &src[e.src_offset..e.src_offset + e.len]))
                .collect();
            sub.put_v(win, target, &segments)
        }
        IovMethod::Safe | IovMethod::OneLock => {
            for e in entries {
                sub.put(win, target, e.dst_offset, &src[e.src_offset..e.src_offset + e.len])?;
            }
            Ok(())
        }
    }
}

pub fn get(
    sub: &dyn Substrate,
    win: WindowId,
    target: usize,
    dst: &mut [u8],
    entries: &[IovEntry],
    method: IovMethod,
) -> Result<()> {
    if method == IovMethod::Safe {
        // Overlap among *source* ranges on a get is the remote side's problem; here we
        // guard the local `dst` ranges, which really must be disjoint or `split_at_mut`
        // below could not express them as independent slices anyway.
        check_disjoint(entries)?;
    }

    match method {
        IovMethod::Dtype => {
            let mut by_dst: Vec<&IovEntry> = entries.iter().collect();
            by_dst.sort_by_key(|e| e.dst_offset);
            let mut slices: Vec<(usize, &mut [u8])> = Vec::with_capacity(by_dst.len());
            let mut rest = &mut dst[..];
            let mut cursor = 0usize;
            for e in &by_dst {
                let gap = e.dst_offset - cursor;
                let (_, tail) = rest.split_at_mut(gap);
                let (chunk, tail) = tail.split_at_mut(e.len);
                slices.push((e.src_offset, chunk));
                rest = tail;
                cursor = e.dst_offset + e.len;
            }
            sub.get_v(win, target, &mut slices)
        }
        IovMethod::Safe | IovMethod::OneLock => {
            for e in entries {
                sub.get(win, target, e.src_offset, &mut dst[e.dst_offset..e.dst_offset + e.len])?;
            }
            Ok(())
        }
    }
}

/// IOV accumulate: every segment is scaled (if non-identity) into a private buffer,
/// then accumulated one segment at a time — there is no vectored accumulate on the
/// substrate, since a single atomic-visibility accumulate per segment is required
/// regardless of method.
pub fn acc(
    sub: &dyn Substrate,
    win: WindowId,
    target: usize,
    dt: Datatype,
    scale_factor: Scale,
    src: &[u8],
    entries: &[IovEntry],
    method: IovMethod,
) -> Result<()> {
    if method == IovMethod::Safe {
        check_disjoint(entries)?;
    }
    for e in entries {
        let chunk = &src[e.src_offset..e.src_offset + e.len];
        if scale_factor.is_identity(dt) {
            sub.accumulate(win, target, e.dst_offset, chunk, dt, AccOp::Sum)?;
        } else {
            let mut scaled = vec![0u8; e.len];
            scale::apply(dt, scale_factor, chunk, &mut scaled)?;
            sub.accumulate(win, target, e.dst_offset, &scaled, dt, AccOp::Sum)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::LocalSubstrate;

    #[test]
    fn overlap_detection_naive_and_tree_agree() {
        let disjoint = vec![
            IovEntry { src_offset: 0, dst_offset: 0, len: 4 },
            IovEntry { src_offset: 4, dst_offset: 4, len: 4 },
        ];
        assert!(check_disjoint(&disjoint).is_ok());

        let overlapping = vec![
            IovEntry { src_offset: 0, dst_offset: 0, len: 4 },
            IovEntry { src_offset: 4, dst_offset: 2, len: 4 },
        ];
        assert!(check_disjoint(&overlapping).is_err());

        let many_disjoint: Vec<IovEntry> = (0..64)
            .map(|i| IovEntry { src_offset: i * 4, dst_offset: i * 4, len: 4 })
            .collect();
        assert!(check_disjoint(&many_disjoint).is_ok());

        let mut many_overlap = many_disjoint.clone();
        many_overlap.push(IovEntry { src_offset: 0, dst_offset: 2, len: 4 });
        assert!(check_disjoint(&many_overlap).is_err());
    }

    #[test]
    fn dtype_and_onelock_put_agree() {
        let subs = LocalSubstrate::world(1);
        let sub = subs[0].as_ref();
        let win = sub.create_window(64).unwrap();

        let src: Vec<u8> = (0..16u8).collect();
        let entries = vec![
            IovEntry { src_offset: 0, dst_offset: 8, len: 4 },
            IovEntry { src_offset: 4, dst_offset: 0, len: 4 },
            IovEntry { src_offset: 8, dst_offset: 20, len: 8 },
        ];

        put(sub, win, 0, &src, &entries, IovMethod::Dtype).unwrap();
        let mut dtype_result = vec![0u8; 32];
        sub.get(win, 0, 0, &mut dtype_result).unwrap();

        sub.put(win, 0, 0, &vec![0u8; 32]).unwrap();
        put(sub, win, 0, &src, &entries, IovMethod::OneLock).unwrap();
        let mut onelock_result = vec![0u8; 32];
        sub.get(win, 0, 0, &mut onelock_result).unwrap();

        assert_eq!(dtype_result, onelock_result);
        assert_eq!(&dtype_result[8..12], &src[0..4]);
        assert_eq!(&dtype_result[0..4], &src[4..8]);
        assert_eq!(&dtype_result[20..28], &src[8..16]);
    }

    #[test]
    fn get_round_trips_through_dtype_method() {
        let subs = LocalSubstrate::world(1);
        let sub = subs[0].as_ref();
        let win = sub.create_window(32).unwrap();
        let seed: Vec<u8> = (0..32u8).collect();
        sub.put(win, 0, 0, &seed).unwrap();

        let entries = vec![
            IovEntry { src_offset: 0, dst_offset: 0, len: 4 },
            IovEntry { src_offset: 16, dst_offset: 4, len: 8 },
        ];
        let mut dst = vec![0u8; 12];
        get(sub, win, 0, &mut dst, &entries, IovMethod::Dtype).unwrap();
        assert_eq!(&dst[0..4], &seed[0..4]);
        assert_eq!(&dst[4..12], &seed[16..24]);
    }
}
