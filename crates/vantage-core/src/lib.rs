//! # vantage-core
//!
//! The program core of the Vantage debugger.
//!
//! A [`Program`] is one debugging target (a live kernel, a running process,
//! a core dump, or a caller-built mock) together with the three things every
//! higher layer needs from it:
//! - a [`MemoryReader`](memory::MemoryReader) for raw bytes by address
//! - a [`TypeIndex`](type_index::TypeIndex) for named types and their sizes
//! - a [`SymbolIndex`](symbol_index::SymbolIndex) for name and address lookup
//!
//! All three agree on the target's word size and byte order, and the program
//! records whether the target is a kernel ([`KernelInfo`](metadata::KernelInfo))
//! or a userspace process ([`MappingTable`](metadata::MappingTable)).
//!
//! ## Targets
//!
//! | Constructor | Target |
//! |---|---|
//! | [`Program::from_core_dump`] | ELF core dump or kernel vmcore |
//! | [`Program::from_kernel`] | the running Linux kernel via `/proc/kcore` |
//! | [`Program::from_pid`] | a running process via `/proc/<pid>/mem` |
//! | [`Program::from_mock`] | segments, types and symbols built in memory |
//!
//! Failed construction never leaks: what earlier steps acquired is released
//! newest-first before the error is returned (see [`cleanup`]).

pub mod blocking;
pub mod cleanup;
pub mod config;
pub mod elf;
pub mod error;
pub mod escape;
pub mod formats;
pub mod memory;
pub mod metadata;
pub mod prelude;
pub mod program;
pub mod symbol_index;
pub mod type_index;
pub mod types;

mod backend;

pub use error::{VantageError, VantageResult};
pub use program::{Program, ProgramFlags};
pub use types::{Platform, ProcessId, WordSize};
