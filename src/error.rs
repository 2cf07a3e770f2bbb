//! Error taxonomy and the fatal-abort path for contract violations.

use core::fmt;
use core::panic::Location;

/// The contract-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    NotInitialized,
    DoubleInit,
    InvalidRemotePointer,
    OutOfRange,
    MisalignedSize,
    UnknownDatatype,
    UnknownReductionOperator,
    SharedBufferConfigMismatch,
    MutexNotAllocated,
    MutexAlreadyAllocated,
    SubstrateError,
    OutOfMemory,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::NotInitialized => "runtime not initialized",
            Errno::DoubleInit => "runtime already initialized",
            Errno::InvalidRemotePointer => "pointer is not within any known allocation",
            Errno::OutOfRange => "displacement and length exceed the target slice",
            Errno::MisalignedSize => "byte length is not a multiple of the datatype size",
            Errno::UnknownDatatype => "unrecognized accumulate datatype",
            Errno::UnknownReductionOperator => "unrecognized or unimplemented reduction operator",
            Errno::SharedBufferConfigMismatch => "no-guard policy requested on a separate-memory-model window",
            Errno::MutexNotAllocated => "mutex group has not been created",
            Errno::MutexAlreadyAllocated => "mutex group already exists",
            Errno::SubstrateError => "the message-passing substrate reported an error",
            Errno::OutOfMemory => "local or window allocation failed",
        };
        f.write_str(s)
    }
}

/// A recoverable error: an [`Errno`] plus a human message and the call site.
pub struct Error {
    errno: Errno,
    msg: String,
    location: &'static Location<'static>,
}

impl Error {
    #[track_caller]
    pub fn with_msg(errno: Errno, msg: impl Into<String>) -> Self {
        Self {
            errno,
            msg: msg.into(),
            location: Location::caller(),
        }
    }

    pub fn errno(&self) -> Errno {
        self.errno
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} at {}:{}:{}: {}",
            self.errno,
            self.location.file(),
            self.location.line(),
            self.location.column(),
            self.msg
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.errno, self.msg)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Construct and return an [`Error`] from the current function.
#[macro_export]
macro_rules! return_errno_with_msg {
    ($errno:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::with_msg($errno, format!($($arg)*)))
    };
}

/// Report a contract violation and abort the process group. There is no recovery path:
/// per the failure-semantics design, an invariant violation is fatal, not a `Result`.
#[macro_export]
macro_rules! fatal {
    ($errno:expr, $($arg:tt)*) => {{
        log::error!("fatal: {}: {}", $errno, format!($($arg)*));
        std::process::abort();
    }};
}
