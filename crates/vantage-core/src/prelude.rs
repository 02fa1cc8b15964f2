//! Common module for library exports

pub use crate::cleanup::{CleanupKey, CleanupStack, InitScope, PushRejected};
pub use crate::config::DebugInfoConfig;
pub use crate::error::{VantageError, VantageResult};
pub use crate::memory::{MemoryReader, MockSegment};
pub use crate::metadata::{FileMapping, KernelInfo, MappingTable, TargetKind, TargetMetadata};
pub use crate::program::{Program, ProgramFlags};
pub use crate::symbol_index::{MockSymbol, Symbol, SymbolIndex};
pub use crate::type_index::{MockType, TypeEntry, TypeIndex, TypeKind};
pub use crate::types::{Platform, ProcessId, WordSize};
