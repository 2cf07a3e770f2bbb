//! C4: the origin-buffer guard and the local-access epoch discipline (§4.3).
//!
//! The original implementation has to detect, at runtime, whether a raw pointer the
//! caller handed it happens to alias memory already exposed through some GMR window,
//! because in C any pointer can alias anything. Safe Rust's ownership model rules
//! that out structurally: a `&[u8]` the caller passes to `put`/`get`/`acc` is always
//! borrowed, private memory from the type system's point of view, never a live
//! reference into window storage. What survives from the original guard protocol is
//! the part that is still an observable behavior, not just a C aliasing workaround:
//! the single process-wide local-access epoch, and the scale-then-stage-through-a-
//! private-buffer path used by non-identity accumulate (`crate::scale`).

use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;

use crate::error::{Errno, Result};

lazy_static! {
    static ref EPOCH_OPEN: AtomicBool = AtomicBool::new(false);
}

/// RAII guard for a local-access epoch opened by [`access_begin`]. Closes the epoch
/// on drop so a panicking caller can't leave it stuck open.
pub struct LocalAccessEpoch {
    _private: (),
}

impl Drop for LocalAccessEpoch {
    fn drop(&mut self) {
        EPOCH_OPEN.store(false, Ordering::Release);
    }
}

/// Open the single process-wide local-access epoch, under which a process may read
/// or write its own GMR slice directly instead of through a remote-style RMA call.
/// Only one such epoch may be open at a time (§4.3).
pub fn access_begin() -> Result<LocalAccessEpoch> {
    if EPOCH_OPEN.swap(true, Ordering::AcqRel) {
        crate::return_errno_with_msg!(
            Errno::SharedBufferConfigMismatch,
            "a local-access epoch is already open"
        );
    }
    Ok(LocalAccessEpoch { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_epoch_at_a_time() {
        let e1 = access_begin().unwrap();
        assert!(access_begin().is_err());
        drop(e1);
        let _e2 = access_begin().unwrap();
    }
}
