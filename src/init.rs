//! C11: process-wide lifecycle — `init`/`finalize`, wiring environment parsing
//! (§4.13) into the process-wide [`Config`], and registry teardown with a
//! leak-count warning (§4.11) on `finalize`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::config::{self, Config};
use crate::error::{Errno, Result};
use crate::gmr;
use crate::group::Group;
use crate::substrate::Substrate;

lazy_static! {
    static ref INITIALIZED: AtomicBool = AtomicBool::new(false);
}

/// Bring up the process-wide state and return the world group wrapping `substrate`.
/// `substrate` is expected to already represent the whole world communicator (its
/// own construction is out of scope, per §6).
pub fn init(substrate: Arc<dyn Substrate>) -> Result<Group> {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        crate::return_errno_with_msg!(Errno::DoubleInit, "init called while already initialized");
    }
    let cfg = Config::from_env();
    log::debug!("init: {cfg:?}");
    config::set(cfg);
    let world_size = substrate.size();
    let group = Group::from_substrate(substrate, world_size);
    log::debug!("init: rank {} of {}", group.rank(), group.size());
    Ok(group)
}

/// Tear down the process-wide state: free every allocation still live (logging a
/// `warn!` if any were leaked), then clear the configuration.
pub fn finalize() -> Result<()> {
    if !INITIALIZED.swap(false, Ordering::AcqRel) {
        crate::return_errno_with_msg!(Errno::NotInitialized, "finalize called before init (or twice)");
    }
    let leaked = gmr::destroy_all();
    if leaked > 0 {
        log::warn!("finalize: {leaked} allocation(s) were never destroyed");
    }
    config::clear();
    Ok(())
}
