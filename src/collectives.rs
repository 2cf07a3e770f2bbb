//! C10: collectives over a [`Group`] — barrier, broadcast, reductions, selection,
//! and the binary-tree topology helper (§4.9).

use crate::datatype::Datatype;
use crate::error::Result;
use crate::group::Group;
use crate::substrate::ReduceOp;

pub fn barrier(group: &Group) -> Result<()> {
    group.substrate().barrier()
}

pub fn broadcast(group: &Group, root: usize, buf: &mut [u8]) -> Result<()> {
    group.substrate().broadcast(root, buf)
}

/// Typed all-reduce (`gop`). `AbsMin`/`AbsMax` are accepted by the type but
/// rejected at the substrate layer (reserved, see DESIGN.md).
pub fn gop(group: &Group, send: &[u8], dt: Datatype, op: ReduceOp) -> Result<Vec<u8>> {
    let mut recv = vec![0u8; send.len()];
    group.substrate().allreduce(send, &mut recv, dt, op)?;
    Ok(recv)
}

/// Which extremum [`select`] picks among contributing ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectDirection {
    Min,
    Max,
}

/// The winning entry of a [`select`] call: the world-local rank that contributed
/// it, its ordering key, and its payload.
#[derive(Debug, Clone)]
pub struct Selected {
    pub rank: usize,
    pub key: i64,
    pub payload: Vec<u8>,
}

/// §4.9 "sel": every rank either contributes `(key, payload)` or abstains (`None`).
/// The collective result is the contributing entry whose key achieves the
/// configured extremum; ties are broken in favor of the lowest local rank (not
/// specified further by the original, so a total order must be picked — see
/// DESIGN.md). Returns `Ok(None)` if no rank contributed.
pub fn select(group: &Group, entry: Option<(i64, &[u8])>, direction: SelectDirection) -> Result<Option<Selected>> {
    let sub = group.substrate();
    let size = sub.size();

    let my_len = entry.map_or(-1i64, |(_, p)| p.len() as i64);
    let mut max_len_buf = [0u8; 8];
    sub.allreduce(&my_len.to_ne_bytes(), &mut max_len_buf, Datatype::I64, ReduceOp::Max)?;
    let max_len = i64::from_ne_bytes(max_len_buf);
    if max_len < 0 {
        return Ok(None);
    }
    let max_len = max_len as usize;

    let record_len = 24 + max_len;
    let mut record = vec![0u8; record_len];
    match entry {
        Some((key, payload)) => {
            record[0..8].copy_from_slice(&1i64.to_ne_bytes());
            record[8..16].copy_from_slice(&key.to_ne_bytes());
            record[16..24].copy_from_slice(&(payload.len() as i64).to_ne_bytes());
            record[24..24 + payload.len()].copy_from_slice(payload);
        }
        None => {
            record[0..8].copy_from_slice(&0i64.to_ne_bytes());
        }
    }

    let mut all = vec![0u8; record_len * size];
    sub.allgather(&record, &mut all)?;

    let mut best: Option<Selected> = None;
    for rank in 0..size {
        let rec = &all[rank * record_len..(rank + 1) * record_len];
        let contributes = i64::from_ne_bytes(rec[0..8].try_into().unwrap()) != 0;
        if !contributes {
            continue;
        }
        let key = i64::from_ne_bytes(rec[8..16].try_into().unwrap());
        let own_len = i64::from_ne_bytes(rec[16..24].try_into().unwrap()) as usize;
        let payload = rec[24..24 + own_len].to_vec();

        let better = match &best {
            None => true,
            Some(b) => match direction {
                SelectDirection::Min => key < b.key,
                SelectDirection::Max => key > b.key,
            },
        };
        if better {
            best = Some(Selected { rank, key, payload });
        }
    }
    Ok(best)
}

/// §4.9 binary-tree topology: parent/children of `rank` within a tree of `size`
/// processes laid out in rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRelations {
    pub up: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
}

pub fn tree_relations(rank: usize, size: usize) -> TreeRelations {
    let up = if rank == 0 { None } else { Some((rank - 1) / 2) };
    let left = 2 * rank + 1;
    let right = 2 * rank + 2;
    TreeRelations {
        up,
        left: (left < size).then_some(left),
        right: (right < size).then_some(right),
    }
}
