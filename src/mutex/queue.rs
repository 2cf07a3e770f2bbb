//! §4.8 algorithm Q: a `count × nproc` byte array per target, with FIFO wakeup via
//! a dedicated duplicated communicator (so the mutex group's zero-byte wakeup
//! messages never collide with anything the application sends on the same tag
//! space).

use std::sync::Arc;

use crate::error::{Errno, Result};
use crate::group::Group;
use crate::substrate::{Substrate, WindowId};

/// Tag namespace reserved for mutex wakeups; offset by mutex index within a group.
const TAG_BASE: u32 = 0x6D74_0000;

pub struct QueueMutexGroup {
    substrate: Arc<dyn Substrate>,
    win: WindowId,
    count: usize,
    nproc: usize,
}

impl QueueMutexGroup {
    pub fn create(group: &Group, count: usize) -> Result<Self> {
        // Collective over the whole group, same as the spinning algorithm's window.
        let substrate = group.substrate().dup()?;
        let nproc = substrate.size();
        let win = substrate.create_window(count * nproc)?;
        log::debug!("queue mutex group created with {count} mutexes over {nproc} ranks");
        Ok(Self { substrate, win, count, nproc })
    }

    fn row_start(&self, mutex: usize) -> Result<usize> {
        if mutex >= self.count {
            crate::return_errno_with_msg!(
                Errno::OutOfRange,
                "mutex index {mutex} out of range for a group of {}",
                self.count
            );
        }
        Ok(mutex * self.nproc)
    }

    pub fn lock(&self, mutex: usize, target: usize) -> Result<()> {
        let row_start = self.row_start(mutex)?;
        let my_rank = self.substrate.rank();
        let row = self
            .substrate
            .put_then_get_row(self.win, target, row_start + my_rank, 1, row_start, self.nproc)?;
        let contended = row.iter().enumerate().any(|(i, &b)| i != my_rank && b != 0);
        if contended {
            log::trace!("mutex {mutex}@{target}: queued behind existing holder");
            self.substrate.recv(None, TAG_BASE + mutex as u32)?;
        }
        Ok(())
    }

    pub fn unlock(&self, mutex: usize, target: usize) -> Result<()> {
        let row_start = self.row_start(mutex)?;
        let my_rank = self.substrate.rank();
        let row = self
            .substrate
            .put_then_get_row(self.win, target, row_start + my_rank, 0, row_start, self.nproc)?;
        for step in 1..=self.nproc {
            let i = (my_rank + step) % self.nproc;
            if row[i] != 0 {
                self.substrate.send(i, TAG_BASE + mutex as u32, &[])?;
                break;
            }
        }
        Ok(())
    }

    pub fn destroy(self) -> Result<()> {
        self.substrate.free_window(self.win)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::LocalSubstrate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn mutual_exclusion_holds_under_contention() {
        let n = 5;
        let subs = LocalSubstrate::world(n);
        let counter = StdArc::new(AtomicUsize::new(0));
        let inside = StdArc::new(AtomicUsize::new(0));
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                let counter = counter.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    let g = Group::from_substrate(s, n);
                    let mg = QueueMutexGroup::create(&g, 1).unwrap();
                    g.substrate().barrier().unwrap();
                    for _ in 0..20 {
                        mg.lock(0, 0).unwrap();
                        let depth = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        assert_eq!(depth, 1, "more than one holder observed");
                        counter.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        mg.unlock(0, 0).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20 * n);
    }

    #[test]
    fn independent_mutex_indices_do_not_interfere() {
        let subs = LocalSubstrate::world(2);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, 2);
                    let mg = QueueMutexGroup::create(&g, 2).unwrap();
                    g.substrate().barrier().unwrap();
                    let m = g.rank();
                    mg.lock(m, 0).unwrap();
                    mg.unlock(m, 0).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
