//! # Error Types
//!
//! General error handling for the program core.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::metadata::TargetKind;

/// Main error type for program operations
///
/// Every backend initializer step surfaces one of these immediately. When a step
/// fails, the cleanups registered by the earlier steps are unwound and the
/// original error is returned unchanged.
///
/// ## Error Categories
///
/// 1. **Resource errors**: AllocationFailure, Io
/// 2. **Input errors**: MalformedInput, UnsupportedTarget
/// 3. **Consistency errors**: InconsistentState, VariantMisuse
/// 4. **Access errors**: PermissionDenied, TargetNotFound, Fault
/// 5. **Lookup errors**: Lookup
/// 6. **Lifecycle errors**: Deinitialized, TimedOut
#[derive(Error, Debug)]
pub enum VantageError
{
    /// Memory for bookkeeping (such as a cleanup entry) could not be reserved
    #[error("Allocation failure")]
    AllocationFailure,

    /// Reading or opening a file failed for a reason other than a missing
    /// file or a permission problem
    ///
    /// Use [`VantageError::io`] to build this from an `io::Error`; it routes
    /// `NotFound` and `PermissionDenied` to their dedicated variants.
    #[error("IO error: {context}: {source}")]
    Io
    {
        /// What was being accessed
        context: String,
        /// Underlying operating system error
        #[source]
        source: io::Error,
    },

    /// A note, mapping listing, or container could not be parsed, or a
    /// required field is missing
    ///
    /// Examples:
    /// - VMCOREINFO without `OSRELEASE`
    /// - A truncated `NT_FILE` note
    /// - Overlapping mock segments or duplicate mock symbols
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The target uses a container format or word size we don't handle
    #[error("Unsupported target: {0}")]
    UnsupportedTarget(String),

    /// Two subsystems disagree about word size or byte order, or the program
    /// was assembled inconsistently
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Insufficient permissions to read the target
    ///
    /// On Linux, this typically means:
    /// - `/proc/kcore` requires `CAP_SYS_RAWIO` (run as root)
    /// - `/proc/<pid>/mem` requires ptrace access to the process
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The core dump, process, or debug info file does not exist
    ///
    /// This also covers a process that exits while it is being attached.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The metadata branch for the other kind of target was requested
    ///
    /// Kernel programs carry `KernelInfo`; userspace programs carry a
    /// `MappingTable`. Asking a kernel program for its mappings (or the
    /// reverse) lands here.
    #[error("{requested} is not available for a {kind} program")]
    VariantMisuse
    {
        /// Name of the metadata that was requested
        requested: &'static str,
        /// Kind of the program it was requested from
        kind: TargetKind,
    },

    /// The address range is not backed by any memory segment
    #[error("Could not read {size} bytes at 0x{address:x}: address not mapped")]
    Fault
    {
        /// First address that could not be read
        address: u64,
        /// Number of bytes that remained unread
        size: usize,
    },

    /// A type or symbol was not found
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// The program was already deinitialized
    #[error("Program has been deinitialized")]
    Deinitialized,

    /// A blocking initializer did not finish in time and was abandoned
    #[error("Initialization timed out after {0:?}")]
    TimedOut(Duration),
}

impl VantageError
{
    /// Classify an `io::Error` that happened while accessing `context`.
    ///
    /// `NotFound` and `ESRCH` become [`VantageError::TargetNotFound`],
    /// `PermissionDenied` becomes [`VantageError::PermissionDenied`], and
    /// everything else is kept as [`VantageError::Io`].
    pub fn io(context: impl Into<String>, source: io::Error) -> Self
    {
        let context = context.into();
        if source.raw_os_error() == Some(libc::ESRCH) {
            return Self::TargetNotFound(format!("{context}: {source}"));
        }
        match source.kind() {
            io::ErrorKind::NotFound => Self::TargetNotFound(format!("{context}: {source}")),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(format!("{context}: {source}")),
            _ => Self::Io { context, source },
        }
    }

    /// Build a [`VantageError::MalformedInput`] from any displayable parse error.
    pub(crate) fn malformed(context: &str, err: impl std::fmt::Display) -> Self
    {
        Self::MalformedInput(format!("{context}: {err}"))
    }
}

impl From<io::Error> for VantageError
{
    fn from(source: io::Error) -> Self
    {
        Self::io("I/O", source)
    }
}

/// Map a gimli DWARF error to a `VantageError` with context.
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> VantageError
{
    VantageError::malformed(context, err)
}

/// Convenience type alias for `Result<T, VantageError>`
///
/// ```rust
/// use vantage_core::error::VantageResult;
/// fn foo() -> VantageResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type VantageResult<T> = std::result::Result<T, VantageError>;
