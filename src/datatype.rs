//! Accumulate datatype tags.

use static_assertions::const_assert_eq;

use crate::error::{Errno, Result};

/// One of the datatypes accumulate operations recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    I32,
    I64,
    F32,
    F64,
    Cplx32,
    Cplx64,
}

impl Datatype {
    /// Size in bytes of a single element (for complex types, both components together).
    pub const fn size(self) -> usize {
        match self {
            Datatype::I32 | Datatype::F32 => 4,
            Datatype::I64 | Datatype::F64 => 8,
            Datatype::Cplx32 => 8,
            Datatype::Cplx64 => 16,
        }
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, Datatype::Cplx32 | Datatype::Cplx64)
    }

    /// Number of whole elements that fit in `bytes`, failing with [`Errno::MisalignedSize`]
    /// if `bytes` is not an exact multiple of this datatype's size.
    #[track_caller]
    pub fn count_in(self, bytes: usize) -> Result<usize> {
        let sz = self.size();
        if bytes % sz != 0 {
            crate::return_errno_with_msg!(
                Errno::MisalignedSize,
                "byte length {bytes} is not a multiple of datatype size {sz}"
            );
        }
        Ok(bytes / sz)
    }

    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "i32" => Datatype::I32,
            "i64" => Datatype::I64,
            "f32" => Datatype::F32,
            "f64" => Datatype::F64,
            "cplx32" => Datatype::Cplx32,
            "cplx64" => Datatype::Cplx64,
            other => {
                crate::return_errno_with_msg!(Errno::UnknownDatatype, "unrecognized datatype {other:?}")
            }
        })
    }
}

const_assert_eq!(Datatype::I32.size(), 4);
const_assert_eq!(Datatype::I64.size(), 8);
const_assert_eq!(Datatype::Cplx32.size(), 2 * Datatype::F32.size());
const_assert_eq!(Datatype::Cplx64.size(), 2 * Datatype::F64.size());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_in_rejects_misaligned() {
        assert!(Datatype::I32.count_in(6).is_err());
        assert_eq!(Datatype::I32.count_in(8).unwrap(), 2);
        assert_eq!(Datatype::Cplx64.count_in(32).unwrap(), 2);
    }

    #[test]
    fn parse_unknown() {
        assert_eq!(Datatype::parse("bogus").unwrap_err().errno(), Errno::UnknownDatatype);
    }
}
