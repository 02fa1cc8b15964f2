//! # Program
//!
//! One debugging target: a memory reader, a type index and a symbol index that
//! agree on word size and byte order, plus what is known about the target.
//!
//! ## Lifecycle
//!
//! A `Program` only exists once a backend initializer has finished. Every
//! initializer goes through a [`ProgramBuilder`], which stages each acquired
//! collaborator in an [`InitScope`]: if any step fails, what the earlier steps
//! acquired is released newest-first and the step's error is returned as is.
//!
//! [`Program::deinitialize`] (or dropping the program) drains the cleanups the
//! caller registered, then releases the symbol index, the type index and the
//! reader, in that order.
//!
//! ## Example
//!
//! ```rust
//! use vantage_core::memory::MockSegment;
//! use vantage_core::Program;
//!
//! let segment = MockSegment::from_bytes(0x1000, 0x1122_3344_5566_7788u64.to_le_bytes());
//! let mut program = Program::from_mock(8, true, vec![segment], vec![], vec![])?;
//! assert_eq!(program.read_u64(0x1000)?, 0x1122_3344_5566_7788);
//! assert_eq!(program.word_mask(), u64::MAX);
//! program.deinitialize()?;
//! # Ok::<(), vantage_core::VantageError>(())
//! ```

use std::fmt;
use std::path::Path;

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::backend;
use crate::cleanup::{CleanupKey, CleanupStack, InitScope, PushRejected, Staged};
use crate::config::DebugInfoConfig;
use crate::error::{VantageError, VantageResult};
use crate::memory::{MemoryReader, MockSegment};
use crate::metadata::{FileMapping, KernelInfo, MappingTable, TargetKind, TargetMetadata};
use crate::symbol_index::{MockSymbol, Symbol, SymbolIndex};
use crate::type_index::{MockType, TypeEntry, TypeIndex};
use crate::types::{Platform, ProcessId, WordSize};

bitflags! {
    /// Static properties of a program's target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProgramFlags: u32
    {
        /// The target is a Linux kernel (live or from a vmcore).
        const IS_LINUX_KERNEL = 1 << 0;
        /// The target is running, as opposed to a core dump.
        const IS_LIVE = 1 << 1;
    }
}

/// A debugging target.
pub struct Program
{
    platform: Platform,
    flags: ProgramFlags,
    metadata: Option<TargetMetadata>,
    reader: Option<Box<dyn MemoryReader>>,
    type_index: Option<Box<dyn TypeIndex>>,
    symbol_index: Option<Box<dyn SymbolIndex>>,
    cleanup: CleanupStack,
    deinitialized: bool,
}

impl Program
{
    /// Open a kernel vmcore or a process core dump.
    ///
    /// Debug info is located with [`DebugInfoConfig::from_env`]. With
    /// `verbose`, missing debug info is reported at `warn` level.
    ///
    /// ## Errors
    ///
    /// - `TargetNotFound` / `PermissionDenied` / `Io`: the dump could not be read
    /// - `UnsupportedTarget`: the file is not an ELF core
    /// - `MalformedInput`: the dump has neither a VMCOREINFO nor an `NT_FILE`
    ///   note, or a note is corrupt
    /// - `Lookup`: a kernel dump's `vmlinux` was not found
    /// - `InconsistentState`: debug info disagrees with the dump's word size or
    ///   byte order
    pub fn from_core_dump(path: impl AsRef<Path>, verbose: bool) -> VantageResult<Self>
    {
        Self::from_core_dump_with(path, verbose, &DebugInfoConfig::from_env())
    }

    /// [`Program::from_core_dump`] with explicit debug info settings.
    pub fn from_core_dump_with(path: impl AsRef<Path>, verbose: bool, config: &DebugInfoConfig) -> VantageResult<Self>
    {
        backend::core_dump::initialize(path.as_ref(), verbose, config)
    }

    /// Attach to the running kernel through `/proc/kcore`.
    ///
    /// ## Errors
    ///
    /// - `PermissionDenied`: `/proc/kcore` needs root
    /// - `Lookup`: no `vmlinux` for the running release and no readable
    ///   `/proc/kallsyms`
    /// - `InconsistentState`: the `vmlinux` found belongs to another kernel
    pub fn from_kernel(verbose: bool) -> VantageResult<Self>
    {
        Self::from_kernel_with(verbose, &DebugInfoConfig::from_env())
    }

    /// [`Program::from_kernel`] with explicit debug info settings.
    pub fn from_kernel_with(verbose: bool, config: &DebugInfoConfig) -> VantageResult<Self>
    {
        backend::kernel::initialize(verbose, config)
    }

    /// Attach to a running process.
    ///
    /// ## Errors
    ///
    /// - `TargetNotFound`: no such process, or it exited during attach
    /// - `PermissionDenied`: no ptrace access to the process
    pub fn from_pid(pid: impl Into<ProcessId>) -> VantageResult<Self>
    {
        backend::pid::initialize(pid.into())
    }

    /// Build a program from synthetic memory, types and symbols.
    ///
    /// ## Errors
    ///
    /// - `UnsupportedTarget`: `word_size` is not 4 or 8
    /// - `MalformedInput`: segments overlap or are empty, or a type or symbol
    ///   name repeats
    pub fn from_mock(
        word_size: u8,
        little_endian: bool,
        segments: Vec<MockSegment>,
        types: Vec<MockType>,
        symbols: Vec<MockSymbol>,
    ) -> VantageResult<Self>
    {
        backend::mock::initialize(word_size, little_endian, segments, types, symbols)
    }

    #[must_use]
    pub fn platform(&self) -> Platform
    {
        self.platform
    }

    #[must_use]
    pub fn word_size(&self) -> WordSize
    {
        self.platform.word_size()
    }

    #[must_use]
    pub fn is_little_endian(&self) -> bool
    {
        self.platform.is_little_endian()
    }

    /// Largest value a target word can hold.
    #[must_use]
    pub fn word_mask(&self) -> u64
    {
        self.platform.word_size().mask()
    }

    #[must_use]
    pub fn flags(&self) -> ProgramFlags
    {
        self.flags
    }

    #[must_use]
    pub fn is_linux_kernel(&self) -> bool
    {
        self.flags.contains(ProgramFlags::IS_LINUX_KERNEL)
    }

    #[must_use]
    pub fn is_live(&self) -> bool
    {
        self.flags.contains(ProgramFlags::IS_LIVE)
    }

    #[must_use]
    pub fn is_deinitialized(&self) -> bool
    {
        self.deinitialized
    }

    pub fn metadata(&self) -> VantageResult<&TargetMetadata>
    {
        self.metadata.as_ref().ok_or(VantageError::Deinitialized)
    }

    /// ## Errors
    ///
    /// - `VariantMisuse`: this is a userspace program
    pub fn kernel_info(&self) -> VantageResult<&KernelInfo>
    {
        self.metadata()?.kernel_info()
    }

    /// ## Errors
    ///
    /// - `VariantMisuse`: this is a kernel program
    pub fn mappings(&self) -> VantageResult<&MappingTable>
    {
        self.metadata()?.mappings()
    }

    /// The file mapping containing `address`, if any.
    ///
    /// ## Errors
    ///
    /// - `VariantMisuse`: this is a kernel program
    pub fn mapping_for(&self, address: u64) -> VantageResult<Option<&FileMapping>>
    {
        Ok(self.mappings()?.find(address))
    }

    pub fn reader(&self) -> VantageResult<&dyn MemoryReader>
    {
        self.reader.as_deref().ok_or(VantageError::Deinitialized)
    }

    pub fn type_index(&self) -> VantageResult<&dyn TypeIndex>
    {
        self.type_index.as_deref().ok_or(VantageError::Deinitialized)
    }

    pub fn symbol_index(&self) -> VantageResult<&dyn SymbolIndex>
    {
        self.symbol_index.as_deref().ok_or(VantageError::Deinitialized)
    }

    /// Fill `buf` from the target's virtual (or, with `physical`, physical)
    /// address space.
    ///
    /// ## Errors
    ///
    /// - `Fault`: part of the range is not mapped
    pub fn read_memory(&self, address: u64, buf: &mut [u8], physical: bool) -> VantageResult<()>
    {
        self.reader()?.read(address, buf, physical)
    }

    pub fn read_bytes(&self, address: u64, len: usize) -> VantageResult<Vec<u8>>
    {
        let mut buf = vec![0; len];
        self.read_memory(address, &mut buf, false)?;
        Ok(buf)
    }

    fn read_uint(&self, address: u64, width: usize) -> VantageResult<u64>
    {
        let mut buf = [0u8; 8];
        self.read_memory(address, &mut buf[..width], false)?;
        Ok(self.platform.decode_uint(&buf[..width]))
    }

    pub fn read_u8(&self, address: u64) -> VantageResult<u8>
    {
        let mut buf = [0u8; 1];
        self.read_memory(address, &mut buf, false)?;
        Ok(buf[0])
    }

    pub fn read_u16(&self, address: u64) -> VantageResult<u16>
    {
        self.read_uint(address, 2).map(|value| value as u16)
    }

    pub fn read_u32(&self, address: u64) -> VantageResult<u32>
    {
        self.read_uint(address, 4).map(|value| value as u32)
    }

    pub fn read_u64(&self, address: u64) -> VantageResult<u64>
    {
        self.read_uint(address, 8)
    }

    /// Read one target word (4 or 8 bytes) in the target's byte order.
    pub fn read_word(&self, address: u64) -> VantageResult<u64>
    {
        self.read_uint(address, usize::from(self.platform.word_size().bytes()))
    }

    /// ## Errors
    ///
    /// - `Lookup`: no type called `name`
    pub fn find_type(&self, name: &str) -> VantageResult<TypeEntry>
    {
        self.type_index()?
            .find(name)
            .ok_or_else(|| VantageError::Lookup(format!("could not find type {name:?}")))
    }

    /// ## Errors
    ///
    /// - `Lookup`: no symbol called `name`
    pub fn find_symbol(&self, name: &str) -> VantageResult<&Symbol>
    {
        self.symbol_index()?
            .find_by_name(name)
            .ok_or_else(|| VantageError::Lookup(format!("could not find symbol {name:?}")))
    }

    /// The symbol covering `address`.
    ///
    /// ## Errors
    ///
    /// - `Lookup`: no symbol covers `address`
    pub fn symbolize(&self, address: u64) -> VantageResult<&Symbol>
    {
        self.symbol_index()?
            .find_by_address(address)
            .ok_or_else(|| VantageError::Lookup(format!("no symbol at 0x{address:x}")))
    }

    /// Register `action` to run when the program is torn down.
    ///
    /// Actions run newest-first, before the collaborators are released.
    ///
    /// ## Errors
    ///
    /// The action is handed back, unregistered, if the stack cannot grow or the
    /// program was already deinitialized.
    pub fn add_cleanup<F>(&mut self, key: CleanupKey, action: F) -> Result<(), PushRejected<F>>
    where
        F: FnOnce() -> VantageResult<()> + Send + 'static,
    {
        if self.deinitialized {
            return Err(PushRejected::closed(key, action));
        }
        self.cleanup.push(key, action)
    }

    /// Unregister the most recently added cleanup with `key` without running it.
    pub fn remove_cleanup(&mut self, key: &CleanupKey) -> bool
    {
        self.cleanup.remove(key)
    }

    /// Tear the program down.
    ///
    /// ## Errors
    ///
    /// - `Deinitialized`: the program was already torn down; nothing runs again
    pub fn deinitialize(&mut self) -> VantageResult<()>
    {
        if self.deinitialized {
            return Err(VantageError::Deinitialized);
        }
        self.deinitialized = true;

        let ran = self.cleanup.drain();
        drop(self.symbol_index.take());
        drop(self.type_index.take());
        drop(self.reader.take());
        self.metadata = None;
        debug!(cleanups = ran, "program deinitialized");
        Ok(())
    }
}

impl Drop for Program
{
    fn drop(&mut self)
    {
        if !self.deinitialized {
            let _ = self.deinitialize();
        }
    }
}

impl fmt::Debug for Program
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Program")
            .field("platform", &self.platform)
            .field("flags", &self.flags)
            .field("kind", &self.metadata.as_ref().map(TargetMetadata::kind))
            .field("cleanups", &self.cleanup.len())
            .field("deinitialized", &self.deinitialized)
            .finish_non_exhaustive()
    }
}

/// Step-by-step assembly of a [`Program`] for the backend initializers.
///
/// Each `install_*` call checks the collaborator against the platform fixed at
/// construction and stages it; dropping the builder before
/// [`ProgramBuilder::finish`] releases everything staged so far, newest first.
pub(crate) struct ProgramBuilder
{
    scope: InitScope,
    platform: Platform,
    reader: Option<Staged<Box<dyn MemoryReader>>>,
    type_index: Option<Staged<Box<dyn TypeIndex>>>,
    symbol_index: Option<Staged<Box<dyn SymbolIndex>>>,
    metadata: Option<Staged<TargetMetadata>>,
}

impl ProgramBuilder
{
    pub(crate) fn new(name: &'static str, platform: Platform) -> Self
    {
        trace!(backend = name, %platform, "starting program initialization");
        Self {
            scope: InitScope::new(name),
            platform,
            reader: None,
            type_index: None,
            symbol_index: None,
            metadata: None,
        }
    }

    pub(crate) fn platform(&self) -> Platform
    {
        self.platform
    }

    /// Hold a backend-specific resource until it is claimed.
    pub(crate) fn stage<T>(&mut self, label: &'static str, value: T) -> VantageResult<Staged<T>>
    where
        T: Send + 'static,
    {
        self.scope.stage(CleanupKey::new(label, 0), value)
    }

    pub(crate) fn claim<T>(&mut self, staged: Staged<T>) -> VantageResult<T>
    {
        self.scope.claim(staged)
    }

    pub(crate) fn install_reader(&mut self, reader: Box<dyn MemoryReader>) -> VantageResult<()>
    {
        if self.reader.is_some() {
            return Err(VantageError::InconsistentState("memory reader installed twice".to_string()));
        }
        self.platform.ensure_matches(reader.platform(), "memory reader")?;
        self.reader = Some(self.scope.stage(CleanupKey::new("memory-reader", 0), reader)?);
        Ok(())
    }

    /// Read through the installed reader before the program exists.
    pub(crate) fn read(&self, address: u64, buf: &mut [u8], physical: bool) -> VantageResult<()>
    {
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| VantageError::InconsistentState("no memory reader installed".to_string()))?;
        reader.with(|reader| reader.read(address, buf, physical))?
    }

    pub(crate) fn set_metadata(&mut self, metadata: TargetMetadata) -> VantageResult<()>
    {
        if self.metadata.is_some() {
            return Err(VantageError::InconsistentState("target metadata set twice".to_string()));
        }
        trace!(kind = %metadata.kind(), "target metadata");
        self.metadata = Some(self.scope.stage(CleanupKey::new("target-metadata", 0), metadata)?);
        Ok(())
    }

    pub(crate) fn with_metadata<R>(&self, f: impl FnOnce(&TargetMetadata) -> R) -> VantageResult<R>
    {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| VantageError::InconsistentState("target metadata not set".to_string()))?;
        metadata.with(f)
    }

    pub(crate) fn install_type_index(&mut self, index: Box<dyn TypeIndex>) -> VantageResult<()>
    {
        if self.type_index.is_some() {
            return Err(VantageError::InconsistentState("type index installed twice".to_string()));
        }
        self.platform.ensure_matches(index.platform(), "type index")?;
        self.type_index = Some(self.scope.stage(CleanupKey::new("type-index", 0), index)?);
        Ok(())
    }

    pub(crate) fn install_symbol_index(&mut self, index: Box<dyn SymbolIndex>) -> VantageResult<()>
    {
        if self.symbol_index.is_some() {
            return Err(VantageError::InconsistentState("symbol index installed twice".to_string()));
        }
        self.platform.ensure_matches(index.platform(), "symbol index")?;
        self.symbol_index = Some(self.scope.stage(CleanupKey::new("symbol-index", 0), index)?);
        Ok(())
    }

    /// Hand everything over to a new [`Program`].
    ///
    /// ## Errors
    ///
    /// - `InconsistentState`: a collaborator or the metadata is missing, or
    ///   `IS_LINUX_KERNEL` disagrees with the metadata
    pub(crate) fn finish(mut self, flags: ProgramFlags) -> VantageResult<Program>
    {
        let missing = |what: &str| VantageError::InconsistentState(format!("{what} was never installed"));
        let metadata = self.metadata.take().ok_or_else(|| missing("target metadata"))?;
        let reader = self.reader.take().ok_or_else(|| missing("memory reader"))?;
        let type_index = self.type_index.take().ok_or_else(|| missing("type index"))?;
        let symbol_index = self.symbol_index.take().ok_or_else(|| missing("symbol index"))?;

        let kernel = flags.contains(ProgramFlags::IS_LINUX_KERNEL);
        let kind = metadata.with(TargetMetadata::kind)?;
        if kernel != (kind == TargetKind::Kernel) {
            return Err(VantageError::InconsistentState(format!(
                "{kind} metadata for a program with flags {flags:?}"
            )));
        }

        let symbol_index = self.scope.claim(symbol_index)?;
        let type_index = self.scope.claim(type_index)?;
        let reader = self.scope.claim(reader)?;
        let metadata = self.scope.claim(metadata)?;
        let cleanup = self.scope.commit();

        debug!(platform = %self.platform, ?flags, %kind, "program initialized");
        Ok(Program {
            platform: self.platform,
            flags,
            metadata: Some(metadata),
            reader: Some(reader),
            type_index: Some(type_index),
            symbol_index: Some(symbol_index),
            cleanup,
            deinitialized: false,
        })
    }
}
