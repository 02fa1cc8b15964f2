//! # Debug Info Configuration
//!
//! Where to look for kernel debug info.
//!
//! A kernel program needs the `vmlinux` that matches the running (or dumped)
//! kernel's release. It is looked for, in order, in:
//!
//! 1. each entry of [`DebugInfoConfig::search_paths`] (a file is used as-is, a
//!    directory is searched for `vmlinux-<release>`, `<release>/vmlinux` and
//!    `vmlinux`)
//! 2. `/usr/lib/debug/lib/modules/<release>/vmlinux`
//! 3. `/lib/modules/<release>/build/vmlinux`
//! 4. `/boot/vmlinux-<release>`
//!
//! Without a `vmlinux`, kernel core dumps fall back to `System.map-<release>`
//! (searched in the same directories, then `/boot` and the module build tree)
//! for symbols.
//!
//! ## Environment
//!
//! - `VANTAGE_DEBUG_INFO_PATH`: colon-separated extra search paths, searched
//!   before any added programmatically
//! - `VANTAGE_ALLOW_MISSING_DEBUG_INFO`: `1`/`true` to continue without
//!   `vmlinux` instead of failing

use std::env;
use std::path::{Path, PathBuf};

use tracing::trace;

pub const DEBUG_INFO_PATH_ENV: &str = "VANTAGE_DEBUG_INFO_PATH";
pub const ALLOW_MISSING_ENV: &str = "VANTAGE_ALLOW_MISSING_DEBUG_INFO";

/// Debug info lookup settings for the core dump and live kernel backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfoConfig
{
    /// Files or directories searched before the standard locations.
    pub search_paths: Vec<PathBuf>,
    /// Continue without types and symbols when no `vmlinux` is found.
    pub allow_missing: bool,
}

impl DebugInfoConfig
{
    /// Defaults plus whatever the environment sets.
    #[must_use]
    pub fn from_env() -> Self
    {
        let search_paths = env::var_os(DEBUG_INFO_PATH_ENV)
            .map(|value| env::split_paths(&value).filter(|path| !path.as_os_str().is_empty()).collect())
            .unwrap_or_default();
        let allow_missing = env::var(ALLOW_MISSING_ENV)
            .is_ok_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        Self {
            search_paths,
            allow_missing,
        }
    }

    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.search_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn allow_missing(mut self, allow: bool) -> Self
    {
        self.allow_missing = allow;
        self
    }

    /// Every path that may hold the `vmlinux` for `release`, in search order.
    #[must_use]
    pub fn vmlinux_candidates(&self, release: &str) -> Vec<PathBuf>
    {
        let mut candidates = Vec::new();
        for path in &self.search_paths {
            if path.is_dir() {
                candidates.push(path.join(format!("vmlinux-{release}")));
                candidates.push(path.join(release).join("vmlinux"));
                candidates.push(path.join("vmlinux"));
            } else {
                candidates.push(path.clone());
            }
        }
        candidates.push(Path::new("/usr/lib/debug/lib/modules").join(release).join("vmlinux"));
        candidates.push(Path::new("/lib/modules").join(release).join("build/vmlinux"));
        candidates.push(PathBuf::from(format!("/boot/vmlinux-{release}")));
        candidates
    }

    /// The first existing candidate for `release`.
    #[must_use]
    pub fn find_vmlinux(&self, release: &str) -> Option<PathBuf>
    {
        let found = self.vmlinux_candidates(release).into_iter().find(|path| path.is_file());
        trace!(release, found = ?found, "searched for vmlinux");
        found
    }

    /// Every path that may hold the `System.map` for `release`, in search order.
    ///
    /// Only directories in [`DebugInfoConfig::search_paths`] are searched.
    #[must_use]
    pub fn system_map_candidates(&self, release: &str) -> Vec<PathBuf>
    {
        let mut candidates = Vec::new();
        for path in self.search_paths.iter().filter(|path| path.is_dir()) {
            candidates.push(path.join(format!("System.map-{release}")));
            candidates.push(path.join(release).join("System.map"));
        }
        candidates.push(PathBuf::from(format!("/boot/System.map-{release}")));
        candidates.push(Path::new("/lib/modules").join(release).join("build/System.map"));
        candidates
    }

    /// The first existing `System.map` for `release`.
    #[must_use]
    pub fn find_system_map(&self, release: &str) -> Option<PathBuf>
    {
        let found = self.system_map_candidates(release).into_iter().find(|path| path.is_file());
        trace!(release, found = ?found, "searched for System.map");
        found
    }
}
