//! Process-wide configuration, parsed once at init from the recognized environment variables.

use std::env;

use lazy_static::lazy_static;

use crate::error::{Errno, Result};
use crate::os::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IovMethod {
    Auto,
    Safe,
    OneLock,
    Dtype,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StridedMethod {
    Iov,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrBufMethod {
    Copy,
    Lock,
    NoGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileLevel {
    Off,
    Basic,
    Verbose,
    Histogram,
}

/// Snapshot of every recognized environment variable, with its documented default.
#[derive(Debug, Clone)]
pub struct Config {
    pub iov_method: IovMethod,
    pub strided_method: StridedMethod,
    pub shr_buf_method: ShrBufMethod,
    pub debug_alloc: bool,
    pub disable_iov_checks: bool,
    pub no_mpi_bottom: bool,
    pub no_flush_local: bool,
    pub verbose: bool,
    pub profile: ProfileLevel,
    pub profile_output: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iov_method: IovMethod::Auto,
            strided_method: StridedMethod::Iov,
            shr_buf_method: ShrBufMethod::Copy,
            debug_alloc: false,
            disable_iov_checks: false,
            no_mpi_bottom: false,
            no_flush_local: false,
            verbose: false,
            profile: ProfileLevel::Off,
            profile_output: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("IOV_METHOD") {
            cfg.iov_method = match v.as_str() {
                "AUTO" => IovMethod::Auto,
                "SAFE" => IovMethod::Safe,
                "ONELOCK" => IovMethod::OneLock,
                "DTYPE" => IovMethod::Dtype,
                other => {
                    log::warn!("IOV_METHOD={other:?} is not recognized, using AUTO");
                    IovMethod::Auto
                }
            };
        }
        if let Ok(v) = env::var("STRIDED_METHOD") {
            cfg.strided_method = match v.as_str() {
                "IOV" => StridedMethod::Iov,
                "DIRECT" => StridedMethod::Direct,
                other => {
                    log::warn!("STRIDED_METHOD={other:?} is not recognized, using IOV");
                    StridedMethod::Iov
                }
            };
        }
        if let Ok(v) = env::var("SHR_BUF_METHOD") {
            cfg.shr_buf_method = match v.as_str() {
                "COPY" => ShrBufMethod::Copy,
                "LOCK" => ShrBufMethod::Lock,
                "NOGUARD" => ShrBufMethod::NoGuard,
                other => {
                    log::warn!("SHR_BUF_METHOD={other:?} is not recognized, using COPY");
                    ShrBufMethod::Copy
                }
            };
        }
        cfg.debug_alloc = env_flag("DEBUG_ALLOC");
        cfg.disable_iov_checks = env_flag("DISABLE_IOV_CHECKS");
        cfg.no_mpi_bottom = env_flag("NO_MPI_BOTTOM");
        cfg.no_flush_local = env_flag("NO_FLUSH_LOCAL");
        cfg.verbose = env_flag("VERBOSE");
        if let Ok(v) = env::var("PROFILE") {
            cfg.profile = match v.as_str() {
                "BASIC" => ProfileLevel::Basic,
                "VERBOSE" => ProfileLevel::Verbose,
                "HISTOGRAM" => ProfileLevel::Histogram,
                other => {
                    log::warn!("PROFILE={other:?} is not recognized, profiling disabled");
                    ProfileLevel::Off
                }
            };
        }
        cfg.profile_output = env::var("PROFILE_OUTPUT").ok();

        cfg
    }
}

fn env_flag(name: &str) -> bool {
    matches!(env::var(name).as_deref(), Ok("1"))
}

lazy_static! {
    static ref CONFIG: RwLock<Option<Config>> = RwLock::new(None);
}

/// Install the process-wide configuration, bypassing `from_env`. `init` calls this
/// with the env-parsed configuration; an embedder that wants explicit control (or a
/// test that wants a specific method without touching process environment
/// variables) may call it directly.
pub fn set(cfg: Config) {
    *CONFIG.write() = Some(cfg);
}

/// Tear down the process-wide configuration. Called by `finalize`.
pub fn clear() {
    *CONFIG.write() = None;
}

/// Run `f` with a reference to the process-wide configuration.
///
/// Fails with [`Errno::NotInitialized`] if called before `init` or after `finalize`.
pub fn with<T>(f: impl FnOnce(&Config) -> T) -> Result<T> {
    let guard = CONFIG.read();
    match guard.as_ref() {
        Some(cfg) => Ok(f(cfg)),
        None => {
            crate::return_errno_with_msg!(Errno::NotInitialized, "configuration accessed before init")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_before_init() {
        clear();
        assert!(with(|_| ()).is_err());
    }

    #[test]
    fn set_and_read() {
        set(Config::default());
        let iov = with(|c| c.iov_method).unwrap();
        assert_eq!(iov, IovMethod::Auto);
        clear();
    }
}
