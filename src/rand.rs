//! A tiny xorshift64 generator for spin-mutex backoff jitter.
//!
//! The teacher's own dependency graph never reaches for a `rand`-family crate for a
//! single internal jitter source, so neither does this one.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static STATE: Cell<u64> = Cell::new(seed());
}

fn seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E3779B97F4A7C15);
    let tid = {
        // Fold in something thread-specific so sibling threads started in the same
        // instant don't share a sequence.
        let addr = &nanos as *const u64 as u64;
        addr
    };
    (nanos ^ tid.rotate_left(17)) | 1
}

fn next_u64() -> u64 {
    STATE.with(|cell| {
        let mut x = cell.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.set(x);
        x
    })
}

/// A uniformly distributed integer in `[lo, hi)`. `hi` must be greater than `lo`.
pub fn uniform(lo: u64, hi: u64) -> u64 {
    debug_assert!(hi > lo);
    lo + next_u64() % (hi - lo)
}

/// `true` with probability `1/n`.
pub fn one_in(n: u64) -> bool {
    debug_assert!(n > 0);
    next_u64() % n == 0
}
