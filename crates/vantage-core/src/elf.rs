//! ELF file handles and DWARF section loading.
//!
//! An [`ElfImage`] is the "open ELF handle" of a file mapping and the source of
//! debug info for the type index and symbol tables for the symbol index. The
//! file is read once; section bytes are kept in shared buffers so gimli readers
//! can be built from them at any time.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{BinaryFormat, Object, ObjectKind, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use once_cell::sync::OnceCell;
use tracing::trace;

use crate::error::{VantageError, VantageResult};
use crate::symbol_index::Symbol;
use crate::types::{Platform, WordSize};

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = Dwarf<OwnedReader>;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const DWARF_SECTIONS: &[SectionId] = &[
    SectionId::DebugAbbrev,
    SectionId::DebugAddr,
    SectionId::DebugInfo,
    SectionId::DebugLine,
    SectionId::DebugLineStr,
    SectionId::DebugRanges,
    SectionId::DebugRngLists,
    SectionId::DebugStr,
    SectionId::DebugStrOffsets,
    SectionId::DebugTypes,
    SectionId::DebugLoc,
    SectionId::DebugLocLists,
];

/// A loadable segment of an ELF file, in link-time addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment
{
    pub vaddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

/// Read the class and data encoding from an ELF identification header.
///
/// This only reads the first few bytes of the file, so it is cheap enough to
/// use on a process's executable before anything else is opened.
///
/// ## Errors
///
/// - `TargetNotFound` / `PermissionDenied` / `Io`: the file could not be read
/// - `UnsupportedTarget`: the file is not ELF or has an unknown class/encoding
pub fn probe_platform(path: &Path) -> VantageResult<Platform>
{
    let mut ident = [0u8; 6];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut ident))
        .map_err(|err| VantageError::io(path.display().to_string(), err))?;
    platform_from_ident(&ident).ok_or_else(|| {
        VantageError::UnsupportedTarget(format!("{} is not a 32- or 64-bit ELF file", path.display()))
    })
}

fn platform_from_ident(ident: &[u8]) -> Option<Platform>
{
    if ident.get(..4)? != ELF_MAGIC {
        return None;
    }
    let word_size = match ident.get(4)? {
        1 => WordSize::Four,
        2 => WordSize::Eight,
        _ => return None,
    };
    let little_endian = match ident.get(5)? {
        1 => true,
        2 => false,
        _ => return None,
    };
    Some(Platform::new(word_size, little_endian))
}

fn load_section_bytes(file: &object::File<'_>, name: &str) -> VantageResult<Option<Arc<[u8]>>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(None);
    };
    let data = section
        .uncompressed_data()
        .map_err(|err| VantageError::malformed(&format!("failed to read {name}"), err))?;
    Ok(Some(match data {
        Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
        Cow::Owned(vec) => vec.into(),
    }))
}

/// Parsed ELF file shared between mappings, the type index and the symbol index.
pub struct ElfImage
{
    path: PathBuf,
    data: Arc<[u8]>,
    platform: Platform,
    kind: ObjectKind,
    segments: Vec<LoadSegment>,
    debug_sections: HashMap<&'static str, Arc<[u8]>>,
    symbols: OnceCell<Vec<Symbol>>,
}

impl ElfImage
{
    /// Read and parse the ELF file at `path`.
    ///
    /// ## Errors
    ///
    /// - `TargetNotFound` / `PermissionDenied` / `Io`: the file could not be read
    /// - `UnsupportedTarget`: the file is not ELF
    /// - `MalformedInput`: the ELF headers or a debug section are corrupt
    pub fn open(path: impl AsRef<Path>) -> VantageResult<Arc<Self>>
    {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| VantageError::io(path.display().to_string(), err))?;
        Self::parse(path.to_path_buf(), Arc::<[u8]>::from(bytes)).map(Arc::new)
    }

    /// Parse ELF bytes that were already read from `path`.
    pub fn parse(path: PathBuf, data: Arc<[u8]>) -> VantageResult<Self>
    {
        let file = object::File::parse(&*data)
            .map_err(|err| VantageError::UnsupportedTarget(format!("failed to parse {}: {err}", path.display())))?;
        if file.format() != BinaryFormat::Elf {
            return Err(VantageError::UnsupportedTarget(format!("{} is not an ELF file", path.display())));
        }

        let word_size = if file.is_64() { WordSize::Eight } else { WordSize::Four };
        let platform = Platform::new(word_size, file.is_little_endian());

        let segments = file
            .segments()
            .map(|segment| {
                let (file_offset, file_size) = segment.file_range();
                LoadSegment {
                    vaddr: segment.address(),
                    file_offset,
                    file_size,
                    mem_size: segment.size(),
                }
            })
            .collect();

        let mut debug_sections = HashMap::new();
        for id in DWARF_SECTIONS {
            if let Some(bytes) = load_section_bytes(&file, id.name())? {
                debug_sections.insert(id.name(), bytes);
            }
        }

        trace!(path = %path.display(), %platform, sections = debug_sections.len(), "parsed ELF image");
        Ok(Self {
            kind: file.kind(),
            path,
            data,
            platform,
            segments,
            debug_sections,
            symbols: OnceCell::new(),
        })
    }

    /// An image with no contents, for tests that only need a handle.
    #[cfg(test)]
    pub(crate) fn empty(path: &str, platform: Platform) -> Self
    {
        Self {
            path: PathBuf::from(path),
            data: Arc::from(Vec::new()),
            platform,
            kind: ObjectKind::Dynamic,
            segments: Vec::new(),
            debug_sections: HashMap::new(),
            symbols: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    #[must_use]
    pub fn platform(&self) -> Platform
    {
        self.platform
    }

    /// `ET_EXEC`, `ET_DYN`, `ET_CORE`, ...
    #[must_use]
    pub fn kind(&self) -> ObjectKind
    {
        self.kind
    }

    pub fn segments(&self) -> &[LoadSegment]
    {
        &self.segments
    }

    /// Whether the file carries a non-empty `.debug_info` section.
    #[must_use]
    pub fn has_debug_info(&self) -> bool
    {
        self.debug_sections
            .get(SectionId::DebugInfo.name())
            .is_some_and(|data| !data.is_empty())
    }

    /// Difference between runtime and link-time addresses for a file mapped at
    /// `start` from `file_offset`.
    ///
    /// Position-dependent executables are never relocated, so their bias is 0.
    #[must_use]
    pub fn load_bias(&self, start: u64, file_offset: u64) -> u64
    {
        if self.kind == ObjectKind::Executable {
            return 0;
        }
        let segment = self.segments.iter().find(|segment| {
            let first_page = segment.file_offset & !0xfff;
            first_page <= file_offset && file_offset < segment.file_offset.saturating_add(segment.file_size.max(1))
        });
        match segment {
            // runtime(x) = start + (x - file_offset); link(x) = vaddr + (x - p_offset)
            Some(segment) => start
                .wrapping_sub(file_offset)
                .wrapping_add(segment.file_offset)
                .wrapping_sub(segment.vaddr),
            None => start.wrapping_sub(file_offset),
        }
    }

    /// Load the DWARF sections into a gimli `Dwarf`.
    pub(crate) fn dwarf(&self) -> VantageResult<OwnedDwarf>
    {
        Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section)))
            .map_err(|err| VantageError::malformed(&format!("failed to load DWARF from {}", self.path.display()), err))
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .debug_sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.platform.endian())
    }

    /// Defined function and data symbols at their link-time addresses.
    ///
    /// Falls back to the dynamic symbol table when the file is stripped.
    pub fn symbols(&self) -> VantageResult<&[Symbol]>
    {
        self.symbols
            .get_or_try_init(|| {
                let file = object::File::parse(&*self.data)
                    .map_err(|err| VantageError::malformed(&format!("failed to parse {}", self.path.display()), err))?;
                let mut symbols = collect_symbols(file.symbols());
                if symbols.is_empty() {
                    symbols = collect_symbols(file.dynamic_symbols());
                }
                trace!(path = %self.path.display(), count = symbols.len(), "loaded ELF symbols");
                Ok(symbols)
            })
            .map(Vec::as_slice)
    }

    /// Link-time address of the first symbol named `name`.
    pub fn symbol_address(&self, name: &str) -> VantageResult<Option<u64>>
    {
        Ok(self.symbols()?.iter().find(|symbol| symbol.name == name).map(|symbol| symbol.address))
    }

    /// Whether the named section contains `needle` anywhere.
    ///
    /// `None` when the file has no such section or it carries no bytes, as in
    /// a separate debug file.
    #[must_use]
    pub fn section_contains(&self, section: &str, needle: &[u8]) -> Option<bool>
    {
        let file = object::File::parse(&*self.data).ok()?;
        let data = file.section_by_name(section)?.data().ok()?;
        if data.is_empty() {
            return None;
        }
        Some(needle.is_empty() || data.windows(needle.len()).any(|window| window == needle))
    }
}

impl fmt::Debug for ElfImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ElfImage")
            .field("path", &self.path)
            .field("platform", &self.platform)
            .field("kind", &self.kind)
            .field("size", &self.data.len())
            .finish_non_exhaustive()
    }
}

fn collect_symbols<'data, I, S>(symbols: I) -> Vec<Symbol>
where
    I: Iterator<Item = S>,
    S: ObjectSymbol<'data>,
{
    symbols
        .filter(|symbol| symbol.is_definition() && matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Data))
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            (!name.is_empty()).then(|| Symbol::new(name, symbol.address(), symbol.size()))
        })
        .collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_platform_from_ident()
    {
        let elf64le = [0x7f, b'E', b'L', b'F', 2, 1];
        let elf32be = [0x7f, b'E', b'L', b'F', 1, 2];
        assert_eq!(platform_from_ident(&elf64le), Some(Platform::new(WordSize::Eight, true)));
        assert_eq!(platform_from_ident(&elf32be), Some(Platform::new(WordSize::Four, false)));
        assert_eq!(platform_from_ident(b"\x7fELF\x03\x01"), None);
        assert_eq!(platform_from_ident(b"MZ\x90\x00\x03\x00"), None);
        assert_eq!(platform_from_ident(b"\x7fEL"), None);
    }

    #[test]
    fn test_load_bias_for_shared_object()
    {
        let mut image = ElfImage::empty("/lib/libfoo.so", Platform::new(WordSize::Eight, true));
        image.segments = vec![
            LoadSegment {
                vaddr: 0,
                file_offset: 0,
                file_size: 0x1000,
                mem_size: 0x1000,
            },
            LoadSegment {
                vaddr: 0x1000,
                file_offset: 0x1000,
                file_size: 0x3000,
                mem_size: 0x3000,
            },
        ];
        assert_eq!(image.load_bias(0x7f00_0000_0000, 0), 0x7f00_0000_0000);
        assert_eq!(image.load_bias(0x7f00_0000_1000, 0x1000), 0x7f00_0000_0000);

        image.kind = ObjectKind::Executable;
        assert_eq!(image.load_bias(0x40_0000, 0), 0);
    }
}
