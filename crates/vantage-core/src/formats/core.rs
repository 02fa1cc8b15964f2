//! ELF core files: kernel vmcores, process core dumps and `/proc/kcore`.
//!
//! Only the headers and notes are read when the file is opened. Memory stays on
//! disk and is read through the segments this module hands to a
//! [`SegmentReader`], so a multi-gigabyte vmcore (or the sparse `/proc/kcore`)
//! is never loaded whole.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object::elf::{FileHeader32, FileHeader64, ET_CORE, PT_LOAD, PT_NOTE};
use object::read::elf::{FileHeader, ProgramHeader};
use object::{Endian, Endianness, FileKind, ReadCache, ReadRef};
use tracing::{debug, trace};

use crate::error::{VantageError, VantageResult};
use crate::memory::{Segment, SegmentReader, SegmentSource};
use crate::types::{Platform, WordSize};

/// A `PT_LOAD` program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSegment
{
    pub vaddr: u64,
    pub paddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

/// A note from a `PT_NOTE` segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreNote
{
    /// Note name without trailing NULs (`CORE`, `VMCOREINFO`, ...).
    pub name: Vec<u8>,
    pub n_type: u32,
    pub desc: Vec<u8>,
}

/// An opened ELF core file.
#[derive(Debug)]
pub struct CoreFile
{
    path: PathBuf,
    file: Arc<File>,
    platform: Platform,
    segments: Vec<CoreSegment>,
    notes: Vec<CoreNote>,
}

impl CoreFile
{
    /// Open `path` and read its program headers and notes.
    ///
    /// ## Errors
    ///
    /// - `TargetNotFound` / `PermissionDenied` / `Io`: the file could not be read
    /// - `UnsupportedTarget`: the file is not an ELF core file
    /// - `MalformedInput`: the headers or notes are corrupt
    pub fn open(path: impl AsRef<Path>) -> VantageResult<Self>
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| VantageError::io(path.display().to_string(), err))?;

        let (platform, segments, notes) = {
            let cache = ReadCache::new(&file);
            let kind = FileKind::parse(&cache)
                .map_err(|err| VantageError::UnsupportedTarget(format!("{}: {err}", path.display())))?;
            match kind {
                FileKind::Elf32 => read_headers::<FileHeader32<Endianness>, _>(&cache, WordSize::Four, path)?,
                FileKind::Elf64 => read_headers::<FileHeader64<Endianness>, _>(&cache, WordSize::Eight, path)?,
                other => {
                    return Err(VantageError::UnsupportedTarget(format!(
                        "{} is {other:?}, not an ELF core file",
                        path.display()
                    )));
                }
            }
        };

        debug!(
            path = %path.display(),
            %platform,
            segments = segments.len(),
            notes = notes.len(),
            "opened ELF core"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
            platform,
            segments,
            notes,
        })
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

    pub fn segments(&self) -> &[CoreSegment]
    {
        &self.segments
    }

    pub fn notes(&self) -> &[CoreNote]
    {
        &self.notes
    }

    /// First note called `name`, optionally also matching `n_type`.
    #[must_use]
    pub fn find_note(&self, name: &[u8], n_type: Option<u32>) -> Option<&CoreNote>
    {
        self.notes
            .iter()
            .find(|note| note.name == name && n_type.map_or(true, |wanted| note.n_type == wanted))
    }

    /// Whether the program headers carry usable physical addresses.
    ///
    /// Producers that do not know them write zero everywhere.
    #[must_use]
    pub fn has_physical_addresses(&self) -> bool
    {
        self.segments.iter().any(|segment| segment.paddr != 0)
    }

    /// Add one memory segment per `PT_LOAD` to `reader`.
    ///
    /// With `physical`, segments whose `p_paddr` is meaningful are also
    /// readable by physical address. Empty segments and segments that overlap
    /// an earlier one are skipped. Returns the number added.
    pub fn add_segments_to(&self, reader: &mut SegmentReader, physical: bool) -> usize
    {
        let physical = physical && self.has_physical_addresses();
        let no_paddr = self.platform.word_size().mask();
        let mut added = 0;
        for core_segment in &self.segments {
            if core_segment.mem_size == 0 {
                continue;
            }
            let source = SegmentSource::File {
                file: Arc::clone(&self.file),
                offset: core_segment.file_offset,
                file_size: core_segment.file_size.min(core_segment.mem_size),
            };
            let mut segment = Segment::new(core_segment.vaddr, core_segment.mem_size, source);
            if physical && core_segment.paddr != no_paddr {
                segment = segment.with_physical(core_segment.paddr);
            }
            match reader.add_segment(segment) {
                Ok(()) => added += 1,
                Err(err) => debug!(vaddr = core_segment.vaddr, error = %err, "skipping PT_LOAD"),
            }
        }
        added
    }
}

type Headers = (Platform, Vec<CoreSegment>, Vec<CoreNote>);

fn read_headers<'data, Elf, R>(data: R, word_size: WordSize, path: &Path) -> VantageResult<Headers>
where
    Elf: FileHeader<Endian = Endianness>,
    R: ReadRef<'data>,
{
    let malformed = |err: object::read::Error| VantageError::malformed(&path.display().to_string(), err);

    let header = Elf::parse(data).map_err(malformed)?;
    let endian = header.endian().map_err(malformed)?;
    if header.e_type(endian) != ET_CORE {
        return Err(VantageError::UnsupportedTarget(format!("{} is not a core file", path.display())));
    }
    let platform = Platform::new(word_size, endian.is_little_endian());

    let mut segments = Vec::new();
    let mut notes = Vec::new();
    for program_header in header.program_headers(endian, data).map_err(malformed)? {
        match program_header.p_type(endian) {
            PT_LOAD => segments.push(CoreSegment {
                vaddr: program_header.p_vaddr(endian).into(),
                paddr: program_header.p_paddr(endian).into(),
                file_offset: program_header.p_offset(endian).into(),
                file_size: program_header.p_filesz(endian).into(),
                mem_size: program_header.p_memsz(endian).into(),
            }),
            PT_NOTE => {
                let Some(mut iter) = program_header.notes(endian, data).map_err(malformed)? else {
                    continue;
                };
                while let Some(note) = iter.next().map_err(malformed)? {
                    let name = note.name();
                    let end = name.iter().rposition(|&byte| byte != 0).map_or(0, |last| last + 1);
                    trace!(name = %String::from_utf8_lossy(&name[..end]), n_type = note.n_type(endian), "core note");
                    notes.push(CoreNote {
                        name: name[..end].to_vec(),
                        n_type: note.n_type(endian),
                        desc: note.desc().to_vec(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok((platform, segments, notes))
}

#[cfg(test)]
mod tests
{
    use std::io::Write;

    use super::*;
    use crate::memory::MemoryReader;

    // Minimal ELF64 little-endian ET_CORE: header, one PT_NOTE, one PT_LOAD.
    fn write_core(note_name: &[u8], n_type: u32, desc: &[u8], load: &[u8], mem_size: u64) -> tempfile::NamedTempFile
    {
        let mut note = Vec::new();
        let name_len = note_name.len() + 1;
        note.extend_from_slice(&(name_len as u32).to_le_bytes());
        note.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        note.extend_from_slice(&n_type.to_le_bytes());
        note.extend_from_slice(note_name);
        note.push(0);
        note.resize((note.len() + 3) & !3, 0);
        note.extend_from_slice(desc);
        note.resize((note.len() + 3) & !3, 0);

        let phoff = 64u64;
        let note_off = phoff + 2 * 56;
        let load_off = note_off + note.len() as u64;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&4u16.to_le_bytes()); // ET_CORE
        out.extend_from_slice(&62u16.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&56u16.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        let mut phdr = |p_type: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64| {
            out.extend_from_slice(&p_type.to_le_bytes());
            out.extend_from_slice(&4u32.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&vaddr.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&filesz.to_le_bytes());
            out.extend_from_slice(&memsz.to_le_bytes());
            out.extend_from_slice(&4u64.to_le_bytes());
        };
        phdr(PT_NOTE, note_off, 0, note.len() as u64, 0);
        phdr(PT_LOAD, load_off, 0x10_0000, load.len() as u64, mem_size);

        out.extend_from_slice(&note);
        out.extend_from_slice(load);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&out).unwrap();
        file
    }

    #[test]
    fn test_open_reads_notes_and_loads()
    {
        let file = write_core(b"VMCOREINFO", 0, b"OSRELEASE=6.1.0\n", b"hello", 0x10);
        let core = CoreFile::open(file.path()).unwrap();

        assert_eq!(core.platform(), Platform::new(WordSize::Eight, true));
        assert_eq!(core.segments().len(), 1);
        assert_eq!(core.segments()[0].vaddr, 0x10_0000);
        let note = core.find_note(b"VMCOREINFO", None).unwrap();
        assert_eq!(note.desc, b"OSRELEASE=6.1.0\n");
        assert!(core.find_note(b"CORE", None).is_none());
        assert!(!core.has_physical_addresses());
    }

    #[test]
    fn test_segments_zero_fill_memsz_tail()
    {
        let file = write_core(b"CORE", 1, &[0; 4], b"abc", 8);
        let core = CoreFile::open(file.path()).unwrap();

        let mut reader = SegmentReader::new(core.platform());
        assert_eq!(core.add_segments_to(&mut reader, false), 1);
        let mut buf = [0xffu8; 8];
        reader.read(0x10_0000, &mut buf, false).unwrap();
        assert_eq!(&buf, b"abc\0\0\0\0\0");
        assert!(reader.read(0x10_0008, &mut buf[..1], false).is_err());
    }

    #[test]
    fn test_non_elf_is_unsupported()
    {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not an ELF file at all, just text").unwrap();
        assert!(matches!(CoreFile::open(file.path()), Err(VantageError::UnsupportedTarget(_))));
    }

    #[test]
    fn test_missing_file()
    {
        assert!(matches!(
            CoreFile::open("/nonexistent/vmcore"),
            Err(VantageError::TargetNotFound(_))
        ));
    }
}
