//! # Types
//!
//! Target-independent value types shared by the program and its subsystems.
//!
//! The memory reader, type index, and symbol index are built independently but
//! must all agree on the target's word size and byte order. [`Platform`] is the
//! value they compare against each other.

pub mod platform;
pub mod process;

// Re-export all public types
pub use platform::{Platform, WordSize};
pub use process::ProcessId;
