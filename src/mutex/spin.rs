//! §4.7 algorithm S: a per-process `i64` cell per mutex, accumulate-based
//! contention, randomized exponential backoff with a per-thread jitter source.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::datatype::Datatype;
use crate::error::{Errno, Result};
use crate::group::Group;
use crate::rand;
use crate::substrate::{AccOp, Substrate, WindowId};

/// Backoff never grows past this many milliseconds between retries.
const MAX_DELAY_MS: u64 = 1024;

pub struct SpinMutexGroup {
    substrate: Arc<dyn Substrate>,
    win: WindowId,
    count: usize,
    /// Ranks are numbered 1..N so that no process ever contributes a zero code.
    my_code: i64,
}

impl SpinMutexGroup {
    pub fn create(group: &Group, count: usize) -> Result<Self> {
        let substrate = group.substrate().clone();
        let win = substrate.create_window(count * 8)?;
        let my_code = substrate.rank() as i64 + 1;
        log::debug!("spin mutex group created with {count} mutexes, my_code={my_code}");
        Ok(Self { substrate, win, count, my_code })
    }

    fn check_index(&self, mutex: usize) -> Result<usize> {
        if mutex >= self.count {
            crate::return_errno_with_msg!(
                Errno::OutOfRange,
                "mutex index {mutex} out of range for a group of {}",
                self.count
            );
        }
        Ok(mutex * 8)
    }

    fn add(&self, target: usize, offset: usize, delta: i64) -> Result<()> {
        self.substrate
            .accumulate(self.win, target, offset, &delta.to_ne_bytes(), Datatype::I64, AccOp::Sum)
    }

    fn read(&self, target: usize, offset: usize) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.substrate.get(self.win, target, offset, &mut buf)?;
        Ok(i64::from_ne_bytes(buf))
    }

    pub fn lock(&self, mutex: usize, target: usize) -> Result<()> {
        let offset = self.check_index(mutex)?;
        self.add(target, offset, self.my_code)?;
        let mut delay = 1u64;
        loop {
            let x = self.read(target, offset)?;
            if x == self.my_code {
                return Ok(());
            }
            self.add(target, offset, -self.my_code)?;
            let wait_ms = rand::uniform(delay, 2 * delay);
            log::trace!("mutex {mutex}@{target}: contended (cell={x}), backing off {wait_ms}ms");
            thread::sleep(Duration::from_millis(wait_ms));
            delay = (delay * 2).min(MAX_DELAY_MS);
            if rand::one_in(self.substrate.size() as u64) {
                delay = 1;
            }
            self.add(target, offset, self.my_code)?;
        }
    }

    pub fn trylock(&self, mutex: usize, target: usize) -> Result<bool> {
        let offset = self.check_index(mutex)?;
        self.add(target, offset, self.my_code)?;
        let x = self.read(target, offset)?;
        if x == self.my_code {
            Ok(true)
        } else {
            self.add(target, offset, -self.my_code)?;
            Ok(false)
        }
    }

    pub fn unlock(&self, mutex: usize, target: usize) -> Result<()> {
        let offset = self.check_index(mutex)?;
        self.add(target, offset, -self.my_code)
    }

    pub fn destroy(self) -> Result<()> {
        self.substrate.free_window(self.win)
    }
}
