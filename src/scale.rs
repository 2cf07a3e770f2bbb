//! The accumulate scaler (C5): applies a datatype-specific scalar multiplication into a
//! private buffer when the scale is not the identity.

use crate::datatype::Datatype;
use crate::error::{Errno, Result};

/// A scalar multiplier for an accumulate operation. Real datatypes use [`Scale::Real`];
/// the complex datatypes use [`Scale::Complex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    Real(f64),
    Complex(f64, f64),
}

impl Scale {
    pub fn is_identity(self, dt: Datatype) -> bool {
        match (self, dt.is_complex()) {
            (Scale::Real(s), false) => s == 1.0,
            (Scale::Complex(re, im), true) => re == 1.0 && im == 0.0,
            _ => false,
        }
    }
}

/// Multiply every element of `src` (interpreted as `dt`) by `scale`, writing the result
/// into `dst`. `src` and `dst` must have equal length, a multiple of `dt.size()`.
pub fn apply(dt: Datatype, scale: Scale, src: &[u8], dst: &mut [u8]) -> Result<()> {
    if src.len() != dst.len() {
        crate::return_errno_with_msg!(
            Errno::MisalignedSize,
            "scale source and destination buffers differ in length"
        );
    }
    let count = dt.count_in(src.len())?;

    match (dt, scale) {
        (Datatype::I32, Scale::Real(s)) => scale_real::<i32, 4>(src, dst, count, s, |b| {
            i32::from_ne_bytes(b.try_into().unwrap())
        }, |v| (v as f64 * s).round() as i32, i32::to_ne_bytes),
        (Datatype::I64, Scale::Real(s)) => scale_real::<i64, 8>(src, dst, count, s, |b| {
            i64::from_ne_bytes(b.try_into().unwrap())
        }, |v| (v as f64 * s).round() as i64, i64::to_ne_bytes),
        (Datatype::F32, Scale::Real(s)) => scale_real::<f32, 4>(src, dst, count, s, |b| {
            f32::from_ne_bytes(b.try_into().unwrap())
        }, |v| (v as f64 * s) as f32, f32::to_ne_bytes),
        (Datatype::F64, Scale::Real(s)) => scale_real::<f64, 8>(src, dst, count, s, |b| {
            f64::from_ne_bytes(b.try_into().unwrap())
        }, |v| v * s, f64::to_ne_bytes),
        (Datatype::Cplx32, Scale::Complex(re, im)) => {
            scale_complex_32(src, dst, count, re as f32, im as f32)
        }
        (Datatype::Cplx64, Scale::Complex(re, im)) => scale_complex_64(src, dst, count, re, im),
        _ => crate::return_errno_with_msg!(
            Errno::UnknownDatatype,
            "scale kind does not match datatype {dt:?}"
        ),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn scale_real<T, const N: usize>(
    src: &[u8],
    dst: &mut [u8],
    count: usize,
    _s: f64,
    from_bytes: impl Fn(&[u8]) -> T,
    mul: impl Fn(T) -> T,
    to_bytes: impl Fn(T) -> [u8; N],
) {
    for i in 0..count {
        let v = from_bytes(&src[i * N..i * N + N]);
        let out = mul(v);
        dst[i * N..i * N + N].copy_from_slice(&to_bytes(out));
    }
}

fn scale_complex_32(src: &[u8], dst: &mut [u8], count: usize, re: f32, im: f32) {
    for i in 0..count {
        let base = i * 8;
        let a = f32::from_ne_bytes(src[base..base + 4].try_into().unwrap());
        let b = f32::from_ne_bytes(src[base + 4..base + 8].try_into().unwrap());
        let (or, oi) = (a * re - b * im, a * im + b * re);
        dst[base..base + 4].copy_from_slice(&or.to_ne_bytes());
        dst[base + 4..base + 8].copy_from_slice(&oi.to_ne_bytes());
    }
}

fn scale_complex_64(src: &[u8], dst: &mut [u8], count: usize, re: f64, im: f64) {
    for i in 0..count {
        let base = i * 16;
        let a = f64::from_ne_bytes(src[base..base + 8].try_into().unwrap());
        let b = f64::from_ne_bytes(src[base + 8..base + 16].try_into().unwrap());
        let (or, oi) = (a * re - b * im, a * im + b * re);
        dst[base..base + 8].copy_from_slice(&or.to_ne_bytes());
        dst[base + 8..base + 16].copy_from_slice(&oi.to_ne_bytes());
    }
}
