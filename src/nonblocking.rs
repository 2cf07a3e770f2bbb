//! C12: the nonblocking façade (§5 "suspension points", §4.3 "flush and
//! completion"). Every RMA call in this runtime is internally blocking end-to-end
//! (there is no background progress engine), so a nonblocking call differs from
//! its blocking counterpart only in *when* the completion flush happens: issuing
//! it returns a [`RmaHandle`] immediately, and the transfer's local or remote
//! visibility is only guaranteed once that handle is waited on.

use crate::datatype::Datatype;
use crate::error::Result;
use crate::rma;
use crate::scale::Scale;

/// What a handle's `wait` must do to make the transfer's effects visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// The origin buffer may be reused once this completes (put/acc).
    Local,
    /// The destination buffer is valid once this completes (get).
    Remote,
}

/// A handle to one outstanding nonblocking RMA operation. Since this runtime has
/// no background progress thread, the operation has always already executed by
/// the time the handle exists — `test` is therefore always ready; `wait` just
/// performs the deferred completion flush.
pub struct RmaHandle {
    target: usize,
    addr: usize,
    completion: Completion,
}

impl RmaHandle {
    /// Always `true`: there is no in-flight state left to poll for.
    pub fn test(&self) -> bool {
        true
    }

    pub fn wait(self) -> Result<()> {
        match self.completion {
            Completion::Local => rma::flush_local(self.target, self.addr),
            Completion::Remote => rma::flush(self.target, self.addr),
        }
    }
}

/// Wait on every handle, in order, short-circuiting on the first error.
pub fn wait_all(handles: Vec<RmaHandle>) -> Result<()> {
    for h in handles {
        h.wait()?;
    }
    Ok(())
}

/// Flush every outstanding operation addressed to `target`'s allocation containing
/// `addr`, without needing the caller to have retained the handles.
pub fn flush_by_proc(target: usize, addr: usize) -> Result<()> {
    rma::flush(target, addr)
}

pub fn put(target: usize, dst_addr: usize, src: &[u8]) -> Result<RmaHandle> {
    rma::put_nb(target, dst_addr, src)?;
    Ok(RmaHandle { target, addr: dst_addr, completion: Completion::Local })
}

pub fn get(target: usize, src_addr: usize, dst: &mut [u8]) -> Result<RmaHandle> {
    rma::get_nb(target, src_addr, dst)?;
    Ok(RmaHandle { target, addr: src_addr, completion: Completion::Remote })
}

pub fn acc(target: usize, dst_addr: usize, dt: Datatype, scale: Scale, src: &[u8]) -> Result<RmaHandle> {
    rma::acc_nb(target, dst_addr, dt, scale, src)?;
    Ok(RmaHandle { target, addr: dst_addr, completion: Completion::Local })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::group::Group;
    use std::thread;

    #[test]
    fn nonblocking_put_completes_after_wait() {
        config::set(config::Config::default());
        let subs = crate::substrate::LocalSubstrate::world(2);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, 2);
                    let (_h, addrs) = crate::gmr::create(&g, 2, 8).unwrap();
                    g.substrate().barrier().unwrap();
                    if g.rank() == 0 {
                        let h = put(1, addrs[1], &[5u8; 8]).unwrap();
                        assert!(h.test());
                        h.wait().unwrap();
                    }
                    g.substrate().barrier().unwrap();
                    if g.rank() == 1 {
                        let mut dst = [0u8; 8];
                        rma::get(1, addrs[1], &mut dst).unwrap();
                        assert_eq!(dst, [5u8; 8]);
                    }
                    g.substrate().barrier().unwrap();
                    crate::gmr::destroy_all();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        config::clear();
    }
}
