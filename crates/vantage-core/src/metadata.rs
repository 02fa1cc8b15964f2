//! # Target Metadata
//!
//! What a program knows about its target beyond raw memory, types, and symbols.
//!
//! A kernel target (live or dumped) carries [`KernelInfo`]: the release string
//! and KASLR offset taken from VMCOREINFO. A userspace target (live process or
//! process core dump) carries a [`MappingTable`]: which ELF file backs which
//! range of the address space. A program has exactly one of the two, fixed when
//! it is initialized.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::elf::ElfImage;
use crate::error::{VantageError, VantageResult};

/// Size of the kernel's `utsname.release` buffer, including the terminator.
pub const OS_RELEASE_CAPACITY: usize = 128;

/// Which kind of target a program describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind
{
    /// Linux kernel, live or from a vmcore
    Kernel,
    /// A userspace process, live or from a core dump
    Userspace,
}

impl fmt::Display for TargetKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            TargetKind::Kernel => write!(f, "kernel"),
            TargetKind::Userspace => write!(f, "userspace"),
        }
    }
}

/// Identification of a Linux kernel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo
{
    os_release: String,
    kaslr_offset: u64,
}

impl KernelInfo
{
    /// Build kernel info from its two parts.
    ///
    /// ## Errors
    ///
    /// - `MalformedInput`: `os_release` is empty, does not fit the kernel's
    ///   128-byte release buffer, or contains a NUL byte
    pub fn new(os_release: impl Into<String>, kaslr_offset: u64) -> VantageResult<Self>
    {
        let os_release = os_release.into();
        if os_release.is_empty() {
            return Err(VantageError::MalformedInput("empty OSRELEASE".to_string()));
        }
        if os_release.len() >= OS_RELEASE_CAPACITY {
            return Err(VantageError::MalformedInput(format!(
                "OSRELEASE is {} bytes, limit is {}",
                os_release.len(),
                OS_RELEASE_CAPACITY - 1
            )));
        }
        if os_release.contains('\0') {
            return Err(VantageError::MalformedInput("OSRELEASE contains a NUL byte".to_string()));
        }
        Ok(Self {
            os_release,
            kaslr_offset,
        })
    }

    /// `uname -r` of the kernel.
    #[must_use]
    pub fn os_release(&self) -> &str
    {
        &self.os_release
    }

    /// Offset from the kernel image's link-time address to where it was
    /// loaded; zero when KASLR is disabled.
    #[must_use]
    pub fn kaslr_offset(&self) -> u64
    {
        self.kaslr_offset
    }
}

/// One ELF file mapped into a process's address space.
#[derive(Debug, Clone)]
pub struct FileMapping
{
    /// Path of the mapped file.
    pub path: PathBuf,
    /// Parsed ELF contents, shared by every mapping of the same file.
    pub elf: Arc<ElfImage>,
    /// First mapped virtual address.
    pub start: u64,
    /// One past the last mapped virtual address.
    pub end: u64,
    /// Offset in the file that corresponds to `start`.
    pub file_offset: u64,
}

impl FileMapping
{
    #[must_use]
    pub fn contains(&self, address: u64) -> bool
    {
        self.start <= address && address < self.end
    }

    /// Offset in the file that backs `address`, if the mapping covers it.
    #[must_use]
    pub fn file_offset_of(&self, address: u64) -> Option<u64>
    {
        self.contains(address)
            .then(|| self.file_offset + (address - self.start))
    }
}

/// Address-ordered, non-overlapping file mappings of a process.
#[derive(Debug, Clone, Default)]
pub struct MappingTable
{
    mappings: Vec<FileMapping>,
}

impl MappingTable
{
    /// Sort `mappings` by start address and check that none overlap.
    ///
    /// ## Errors
    ///
    /// - `MalformedInput`: a mapping is empty or inverted, or two mappings
    ///   overlap
    pub fn new(mut mappings: Vec<FileMapping>) -> VantageResult<Self>
    {
        if let Some(bad) = mappings.iter().find(|mapping| mapping.start >= mapping.end) {
            return Err(VantageError::MalformedInput(format!(
                "mapping of {} has empty range 0x{:x}-0x{:x}",
                bad.path.display(),
                bad.start,
                bad.end
            )));
        }

        mappings.sort_by_key(|mapping| mapping.start);
        if let Some(pair) = mappings.windows(2).find(|pair| pair[1].start < pair[0].end) {
            return Err(VantageError::MalformedInput(format!(
                "mapping 0x{:x}-0x{:x} of {} overlaps 0x{:x}-0x{:x} of {}",
                pair[1].start,
                pair[1].end,
                pair[1].path.display(),
                pair[0].start,
                pair[0].end,
                pair[0].path.display()
            )));
        }

        Ok(Self { mappings })
    }

    /// Find the mapping that contains `address`.
    #[must_use]
    pub fn find(&self, address: u64) -> Option<&FileMapping>
    {
        let index = self.mappings.partition_point(|mapping| mapping.start <= address);
        index
            .checked_sub(1)
            .map(|index| &self.mappings[index])
            .filter(|mapping| mapping.contains(address))
    }

    /// Mappings of the file at `path`, in address order.
    pub fn for_path<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a FileMapping> + 'a
    {
        self.mappings.iter().filter(move |mapping| mapping.path == path)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileMapping>
    {
        self.mappings.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.mappings.is_empty()
    }
}

impl<'a> IntoIterator for &'a MappingTable
{
    type Item = &'a FileMapping;
    type IntoIter = std::slice::Iter<'a, FileMapping>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

/// Kernel info or mapping table, depending on the target.
#[derive(Debug, Clone)]
pub enum TargetMetadata
{
    Kernel(KernelInfo),
    Userspace(MappingTable),
}

impl TargetMetadata
{
    #[must_use]
    pub fn kind(&self) -> TargetKind
    {
        match self {
            TargetMetadata::Kernel(_) => TargetKind::Kernel,
            TargetMetadata::Userspace(_) => TargetKind::Userspace,
        }
    }

    /// ## Errors
    ///
    /// - `VariantMisuse`: this is userspace metadata
    pub fn kernel_info(&self) -> VantageResult<&KernelInfo>
    {
        match self {
            TargetMetadata::Kernel(info) => Ok(info),
            TargetMetadata::Userspace(_) => Err(VantageError::VariantMisuse {
                requested: "kernel info",
                kind: TargetKind::Userspace,
            }),
        }
    }

    /// ## Errors
    ///
    /// - `VariantMisuse`: this is kernel metadata
    pub fn mappings(&self) -> VantageResult<&MappingTable>
    {
        match self {
            TargetMetadata::Userspace(table) => Ok(table),
            TargetMetadata::Kernel(_) => Err(VantageError::VariantMisuse {
                requested: "file mappings",
                kind: TargetKind::Kernel,
            }),
        }
    }
}
