//! Process identifier type.

use std::fmt;
use std::path::PathBuf;

/// Process identifier (PID)
///
/// A PID is a unique number assigned to each running process by the operating
/// system. Live process programs are created from one with
/// [`Program::from_pid`](crate::Program::from_pid).
///
/// ## Example
///
/// ```rust
/// use vantage_core::types::ProcessId;
///
/// let pid = ProcessId::from(12345);
/// assert_eq!(pid.proc_path("maps").to_str(), Some("/proc/12345/maps"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// Path of a file under this process's procfs directory.
    #[must_use]
    pub fn proc_path(self, entry: &str) -> PathBuf
    {
        let mut path = self.proc_dir();
        path.push(entry);
        path
    }

    /// This process's procfs directory (`/proc/<pid>`).
    #[must_use]
    pub fn proc_dir(self) -> PathBuf
    {
        PathBuf::from(format!("/proc/{}", self.0))
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}
