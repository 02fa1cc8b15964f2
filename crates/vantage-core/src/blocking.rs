//! # Initializers with a deadline
//!
//! Opening a core dump or attaching to a kernel can block for a long time on
//! slow storage or a large `vmlinux`. These helpers run an initializer on
//! tokio's blocking pool and stop waiting for it after `timeout`.
//!
//! The initializer thread cannot be interrupted. When the deadline passes it
//! keeps running in the background; whatever it produces is dropped, which
//! unwinds its partial state the same way a failed step would.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use vantage_core::blocking::from_core_dump_with_timeout;
//!
//! # async fn run() -> vantage_core::VantageResult<()> {
//! let program = from_core_dump_with_timeout("/var/crash/vmcore", false, Duration::from_secs(30)).await?;
//! println!("{}", program.platform());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{VantageError, VantageResult};
use crate::program::Program;
use crate::types::ProcessId;

/// Run `init` on the blocking pool, giving up after `timeout`.
///
/// ## Errors
///
/// - `TimedOut`: `init` did not return within `timeout`
/// - `InconsistentState`: `init` panicked
/// - whatever `init` returns
pub async fn with_timeout<F>(timeout: Duration, init: F) -> VantageResult<Program>
where
    F: FnOnce() -> VantageResult<Program> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(init);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(VantageError::InconsistentState(format!(
            "program initializer did not complete: {join_error}"
        ))),
        Err(_) => {
            warn!(?timeout, "program initializer timed out; abandoning it");
            Err(VantageError::TimedOut(timeout))
        }
    }
}

/// [`Program::from_pid`] with a deadline.
///
/// ## Errors
///
/// See [`with_timeout`] and [`Program::from_pid`].
pub async fn from_pid_with_timeout(pid: impl Into<ProcessId>, timeout: Duration) -> VantageResult<Program>
{
    let pid = pid.into();
    with_timeout(timeout, move || Program::from_pid(pid)).await
}

/// [`Program::from_core_dump`] with a deadline.
///
/// ## Errors
///
/// See [`with_timeout`] and [`Program::from_core_dump`].
pub async fn from_core_dump_with_timeout(
    path: impl Into<PathBuf>,
    verbose: bool,
    timeout: Duration,
) -> VantageResult<Program>
{
    let path = path.into();
    with_timeout(timeout, move || Program::from_core_dump(path, verbose)).await
}

/// [`Program::from_kernel`] with a deadline.
///
/// ## Errors
///
/// See [`with_timeout`] and [`Program::from_kernel`].
pub async fn from_kernel_with_timeout(verbose: bool, timeout: Duration) -> VantageResult<Program>
{
    with_timeout(timeout, move || Program::from_kernel(verbose)).await
}
