//! C8/C9: distributed mutexes. §4.7/§4.8 describe two mutually exclusive
//! algorithms sharing one `{create, lock, trylock, unlock, destroy}` interface;
//! both are kept here as a build-time choice via [`MutexAlgorithm`] rather than
//! picking one and discarding the other, since the original ships both and a
//! caller may have a reason to prefer the queue algorithm's boundedness over the
//! spinning algorithm's simplicity.

pub mod queue;
pub mod spin;

use crate::error::Result;
use crate::group::Group;

pub use queue::QueueMutexGroup;
pub use spin::SpinMutexGroup;

/// Which of the two mutex algorithms backs a [`MutexGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexAlgorithm {
    /// Algorithm S: accumulate-based spinning with randomized exponential backoff.
    Spinning,
    /// Algorithm Q: byte-vector queue with circular-scan wakeup.
    Queue,
}

/// A collectively created set of `count` mutexes per member of `group`, backed by
/// whichever algorithm [`MutexAlgorithm`] selects. The trylock variant of the
/// queue algorithm blocks exactly like `lock` (§4.8, documented deviation).
pub enum MutexGroup {
    Spinning(SpinMutexGroup),
    Queue(QueueMutexGroup),
}

impl MutexGroup {
    pub fn create(group: &Group, count: usize, algorithm: MutexAlgorithm) -> Result<Self> {
        Ok(match algorithm {
            MutexAlgorithm::Spinning => MutexGroup::Spinning(SpinMutexGroup::create(group, count)?),
            MutexAlgorithm::Queue => MutexGroup::Queue(QueueMutexGroup::create(group, count)?),
        })
    }

    pub fn lock(&self, mutex: usize, target: usize) -> Result<()> {
        match self {
            MutexGroup::Spinning(m) => m.lock(mutex, target),
            MutexGroup::Queue(m) => m.lock(mutex, target),
        }
    }

    /// The queue algorithm's trylock blocks like `lock` (§4.8); only the spinning
    /// algorithm can genuinely fail fast.
    pub fn trylock(&self, mutex: usize, target: usize) -> Result<bool> {
        match self {
            MutexGroup::Spinning(m) => m.trylock(mutex, target),
            MutexGroup::Queue(m) => {
                m.lock(mutex, target)?;
                Ok(true)
            }
        }
    }

    pub fn unlock(&self, mutex: usize, target: usize) -> Result<()> {
        match self {
            MutexGroup::Spinning(m) => m.unlock(mutex, target),
            MutexGroup::Queue(m) => m.unlock(mutex, target),
        }
    }

    pub fn destroy(self) -> Result<()> {
        match self {
            MutexGroup::Spinning(m) => m.destroy(),
            MutexGroup::Queue(m) => m.destroy(),
        }
    }
}
