//! C6/§4.4: strided put/get/accumulate.
//!
//! A strided descriptor names a nested-loop index space over byte memory: the
//! innermost dimension is a contiguous run of `count[0]` bytes, and each further
//! level repeats the inner shape `count[i]` times at a constant `stride[i-1]`.

use crate::datatype::Datatype;
use crate::error::{Errno, Result};
use crate::scale::{self, Scale};
use crate::substrate::{AccOp, Substrate, WindowId};

/// A nested-stride shape shared by the source and destination of one strided
/// transfer. `count[0]` is the contiguous leading-dimension length in bytes;
/// `stride[i]` is the byte distance between successive blocks at level `i + 1`.
#[derive(Debug, Clone)]
pub struct StrideShape {
    pub count: Vec<usize>,
    pub stride: Vec<usize>,
}

impl StrideShape {
    pub fn levels(&self) -> usize {
        self.stride.len()
    }

    fn validate(&self) -> Result<()> {
        if self.count.len() != self.stride.len() + 1 {
            crate::return_errno_with_msg!(
                Errno::OutOfRange,
                "strided descriptor needs count.len() == stride.len() + 1"
            );
        }
        for w in self.stride.windows(2) {
            if w[1] < w[0] {
                crate::return_errno_with_msg!(
                    Errno::OutOfRange,
                    "strided descriptor strides must be non-decreasing"
                );
            }
        }
        Ok(())
    }

    /// The total byte extent spanned, and the number of contiguous blocks.
    fn block_count(&self) -> usize {
        self.count[1..].iter().product::<usize>().max(1)
    }

    /// Enumerate every contiguous block's byte offset, in row-major order, relative
    /// to `base` (0 for a self-relative enumeration of an origin buffer).
    fn offsets(&self, base: usize) -> Vec<usize> {
        let n = self.block_count();
        let levels = self.levels();
        let mut offsets = Vec::with_capacity(n);
        let mut idx = vec![0usize; levels];
        for _ in 0..n {
            let mut off = base;
            for (level, &i) in idx.iter().enumerate() {
                off += i * self.stride[level];
            }
            offsets.push(off);
            for level in 0..levels {
                idx[level] += 1;
                if idx[level] < self.count[level + 1] {
                    break;
                }
                idx[level] = 0;
            }
        }
        offsets
    }
}

/// Which strategy to use to move the (logically identical) set of blocks. Both
/// strategies produce byte-identical results (testable property 5); they differ only
/// in how many underlying substrate calls are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StridedMethod {
    /// One vectored substrate call carrying every block (subarray-datatype analog).
    Direct,
    /// One substrate call per block (flatten to an explicit block list first).
    Iov,
}

pub fn put(
    sub: &dyn Substrate,
    win: WindowId,
    target: usize,
    src: &[u8],
    src_shape: &StrideShape,
    dst_base: usize,
    dst_shape: &StrideShape,
    method: StridedMethod,
) -> Result<()> {
    src_shape.validate()?;
    dst_shape.validate()?;
    let block_len = src_shape.count[0];
    if dst_shape.count[0] != block_len {
        crate::return_errno_with_msg!(Errno::OutOfRange, "strided put: leading-dimension lengths differ");
    }
    let src_offsets = src_shape.offsets(0);
    let dst_offsets = dst_shape.offsets(dst_base);
    if src_offsets.len() != dst_offsets.len() {
        crate::return_errno_with_msg!(Errno::OutOfRange, "strided put: block counts differ");
    }

    match method {
        StridedMethod::Direct => {
            let segments: Vec<(usize, &[u8])> = dst_offsets
                .iter()
                .zip(src_offsets.iter())
                .map(|(&d, &s)| (d, &src[s..s + block_len]))
                .collect();
            sub.put_v(win, target, &segments)
        }
        StridedMethod::Iov => {
            for (&d, &s) in dst_offsets.iter().zip(src_offsets.iter()) {
                sub.put(win, target, d, &src[s..s + block_len])?;
            }
            Ok(())
        }
    }
}

pub fn get(
    sub: &dyn Substrate,
    win: WindowId,
    target: usize,
    src_base: usize,
    src_shape: &StrideShape,
    dst: &mut [u8],
    dst_shape: &StrideShape,
    method: StridedMethod,
) -> Result<()> {
    src_shape.validate()?;
    dst_shape.validate()?;
    let block_len = src_shape.count[0];
    if dst_shape.count[0] != block_len {
        crate::return_errno_with_msg!(Errno::OutOfRange, "strided get: leading-dimension lengths differ");
    }
    let src_offsets = src_shape.offsets(src_base);
    let dst_offsets = dst_shape.offsets(0);

    // Carve `dst` at each block's own `dst_shape` offset rather than densely: the
    // local destination is scattered per the destination stride, same as `put`'s
    // remote side. Blocks are visited in ascending `dst_offset` order so the carve
    // can proceed left to right over `dst` with a single `split_at_mut` per gap.
    let mut order: Vec<usize> = (0..dst_offsets.len()).collect();
    order.sort_by_key(|&i| dst_offsets[i]);

    match method {
        StridedMethod::Direct => {
            let mut segments: Vec<(usize, &mut [u8])> = Vec::with_capacity(order.len());
            let mut rest = &mut dst[..];
            let mut cursor = 0usize;
            for i in order {
                let gap = dst_offsets[i] - cursor;
                let (_, tail) = rest.split_at_mut(gap);
                let (chunk, tail) = tail.split_at_mut(block_len);
                segments.push((src_offsets[i], chunk));
                rest = tail;
                cursor = dst_offsets[i] + block_len;
            }
            sub.get_v(win, target, &mut segments)
        }
        StridedMethod::Iov => {
            let mut rest = &mut dst[..];
            let mut cursor = 0usize;
            for i in order {
                let gap = dst_offsets[i] - cursor;
                let (_, tail) = rest.split_at_mut(gap);
                let (chunk, tail) = tail.split_at_mut(block_len);
                sub.get(win, target, src_offsets[i], chunk)?;
                rest = tail;
                cursor = dst_offsets[i] + block_len;
            }
            Ok(())
        }
    }
}

/// Strided accumulate: the source is densified into row-major contiguous order
/// first (scaled in the same pass if `scale` is not the identity), then written to
/// the destination's (possibly non-contiguous) blocks with `AccOp::Sum`.
pub fn acc(
    sub: &dyn Substrate,
    win: WindowId,
    target: usize,
    dt: Datatype,
    scale_factor: Scale,
    src: &[u8],
    src_shape: &StrideShape,
    dst_base: usize,
    dst_shape: &StrideShape,
) -> Result<()> {
    src_shape.validate()?;
    dst_shape.validate()?;
    let block_len = src_shape.count[0];
    if dst_shape.count[0] != block_len {
        crate::return_errno_with_msg!(Errno::OutOfRange, "strided acc: leading-dimension lengths differ");
    }
    let src_offsets = src_shape.offsets(0);
    let dst_offsets = dst_shape.offsets(dst_base);

    let mut densified = vec![0u8; block_len * src_offsets.len()];
    for (i, &s) in src_offsets.iter().enumerate() {
        let chunk = &src[s..s + block_len];
        let out = &mut densified[i * block_len..(i + 1) * block_len];
        if scale_factor.is_identity(dt) {
            out.copy_from_slice(chunk);
        } else {
            scale::apply(dt, scale_factor, chunk, out)?;
        }
    }

    for (i, &d) in dst_offsets.iter().enumerate() {
        let chunk = &densified[i * block_len..(i + 1) * block_len];
        sub.accumulate(win, target, d, chunk, dt, AccOp::Sum)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::LocalSubstrate;

    fn make_window(sub: &dyn Substrate, bytes: usize) -> WindowId {
        sub.create_window(bytes).unwrap()
    }

    #[test]
    fn direct_and_iov_strided_put_agree() {
        let subs = LocalSubstrate::world(1);
        let sub = subs[0].as_ref();
        let win = make_window(sub, 64);

        // 4 rows of 4 bytes, row stride 8 within an 8-byte-wide destination window
        // starting at offset 0; source is tightly packed (row stride 4).
        let src: Vec<u8> = (0..16u8).collect();
        let src_shape = StrideShape { count: vec![4, 4], stride: vec![4] };
        let dst_shape = StrideShape { count: vec![4, 4], stride: vec![8] };

        put(sub, win, 0, &src, &src_shape, 0, &dst_shape, StridedMethod::Direct).unwrap();
        let mut direct = vec![0u8; 32];
        sub.get(win, 0, 0, &mut direct).unwrap();

        // reset and redo with the flattened strategy
        sub.put(win, 0, 0, &vec![0u8; 32]).unwrap();
        put(sub, win, 0, &src, &src_shape, 0, &dst_shape, StridedMethod::Iov).unwrap();
        let mut flattened = vec![0u8; 32];
        sub.get(win, 0, 0, &mut flattened).unwrap();

        assert_eq!(direct, flattened);
        for row in 0..4 {
            assert_eq!(&direct[row * 8..row * 8 + 4], &src[row * 4..row * 4 + 4]);
        }
    }
}
