//! # Vantage Utilities
//!
//! Shared utilities and logging setup for Vantage.
//!
//! This crate provides the `tracing` subscriber configuration used by programs
//! built on `vantage-core`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
