//! A one-sided, remote-memory-access runtime over a group-based message-passing
//! substrate.
//!
//! `init()` wraps a [`Substrate`] (the external message-passing collaborator; see
//! `substrate` for the trait and the in-process [`substrate::LocalSubstrate`] used
//! by this crate's own tests) into a world [`group::Group`]. Processes collectively
//! allocate [`gmr::Gmr`]s, then exchange data through `rma`'s put/get/accumulate
//! family, `strided`/`iov` for non-contiguous transfers, `mutex` for distributed
//! mutual exclusion, and `collectives` for barriers, broadcasts, reductions and
//! selection.
//!
//! # Usage Example
//!
//! Two ranks exchanging one word through a collectively allocated region.
//!
//! ```ignore
//! let subs = substrate::LocalSubstrate::world(2);
//! let handles: Vec<_> = subs.into_iter().map(|s| std::thread::spawn(move || {
//!     let group = init(s).unwrap();
//!     let (handle, addrs) = gmr::create(&group, 2, 8).unwrap();
//!     group.substrate().barrier().unwrap();
//!     if group.rank() == 0 {
//!         rma::put(1, addrs[1], &42i64.to_ne_bytes()).unwrap();
//!     }
//!     group.substrate().barrier().unwrap();
//!     if group.rank() == 1 {
//!         let mut buf = [0u8; 8];
//!         rma::get(1, addrs[1], &mut buf).unwrap();
//!         assert_eq!(i64::from_ne_bytes(buf), 42);
//!     }
//!     group.substrate().barrier().unwrap();
//!     gmr::destroy(&group, if group.rank() == 0 { Some(handle) } else { None }).unwrap();
//!     finalize().unwrap();
//! })).collect();
//! for h in handles { h.join().unwrap(); }
//! ```

pub mod bitset;
pub mod collectives;
pub mod config;
pub mod conflict_tree;
pub mod datatype;
pub mod error;
pub mod gmr;
pub mod group;
pub mod guard;
pub mod init;
pub mod iov;
pub mod mutex;
pub mod nonblocking;
pub(crate) mod os;
pub mod rand;
pub mod rma;
pub mod scale;
pub mod strided;
pub mod substrate;

pub use error::{Errno, Error, Result};
pub use init::{finalize, init};
