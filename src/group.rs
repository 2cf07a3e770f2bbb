//! C1: the group table. Wraps a [`Substrate`] communicator with a cached, bidirectional
//! rank-translation table and a compact membership bitset.

use std::sync::Arc;

use crate::bitset::Bitset;
use crate::error::Result;
use crate::substrate::Substrate;

/// Sentinel returned by [`Group::from_world`] for a world rank that is not a member.
/// Exposed for callers that prefer the raw encoding used by the translation cache.
pub const GROUP_NONE: i64 = -1;

/// A process group: a substrate communicator plus rank-translation caches.
pub struct Group {
    substrate: Arc<dyn Substrate>,
    /// Indexed by world rank; `GROUP_NONE` if that world rank is not a member.
    abs_to_grp: Vec<i64>,
    /// Indexed by local (group) rank; the corresponding world rank.
    grp_to_abs: Vec<usize>,
    membership: Bitset,
}

impl Group {
    /// Wrap an already-constructed substrate communicator, building the translation
    /// caches against a world of `world_size` processes.
    pub fn from_substrate(substrate: Arc<dyn Substrate>, world_size: usize) -> Self {
        let grp_to_abs = substrate.world_ranks().to_vec();
        let mut abs_to_grp = vec![GROUP_NONE; world_size];
        let mut membership = Bitset::new(world_size);
        for (local, &world) in grp_to_abs.iter().enumerate() {
            abs_to_grp[world] = local as i64;
            membership.set(world);
        }
        Self {
            substrate,
            abs_to_grp,
            grp_to_abs,
            membership,
        }
    }

    /// Collectively create a child group over `world_ranks` (ascending, world-numbered),
    /// called only by the processes named in `world_ranks`.
    pub fn create_child(&self, world_ranks: &[usize], world_size: usize) -> Result<Self> {
        let sub = self.substrate.split(world_ranks)?;
        Ok(Self::from_substrate(sub, world_size))
    }

    /// Duplicate this group: same membership, independent message space. Collective
    /// over every member of `self`.
    pub fn dup(&self, world_size: usize) -> Result<Self> {
        Ok(Self::from_substrate(self.substrate.dup()?, world_size))
    }

    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    pub fn rank(&self) -> usize {
        self.substrate.rank()
    }

    pub fn size(&self) -> usize {
        self.substrate.size()
    }

    pub fn to_world(&self, local_rank: usize) -> usize {
        self.grp_to_abs[local_rank]
    }

    /// Translate a world rank into this group's local numbering, or `None` if that
    /// process is not a member.
    pub fn from_world(&self, world_rank: usize) -> Option<usize> {
        match self.abs_to_grp[world_rank] {
            GROUP_NONE => None,
            g => Some(g as usize),
        }
    }

    pub fn is_member(&self, world_rank: usize) -> bool {
        self.membership.test(world_rank)
    }
}
