//! # Memory Reader
//!
//! Raw byte access to the target by address.
//!
//! Every backend builds a [`SegmentReader`]: a sorted list of address ranges,
//! each backed by a byte buffer, a region of a file, or a callback.
//!
//! | Backend | Segments |
//! |---|---|
//! | Core dump | one per `PT_LOAD`, backed by the dump file |
//! | Live kernel | one per `PT_LOAD` of `/proc/kcore` |
//! | Live process | a single segment over `/proc/<pid>/mem` |
//! | Mock | the caller's buffers and callbacks |
//!
//! Kernel segments may also carry a physical address so that physical reads
//! (used to locate VMCOREINFO on a live kernel) work through the same reader.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{VantageError, VantageResult};
use crate::types::Platform;

/// Byte-level access to a target's memory.
///
/// Implementations are owned by a [`Program`](crate::Program) and torn down by
/// dropping them.
pub trait MemoryReader: Send
{
    /// Word size and byte order this reader was built for.
    fn platform(&self) -> Platform;

    /// Fill `buf` with the bytes at `address`.
    ///
    /// `physical` selects the physical address space (kernel targets only).
    ///
    /// ## Errors
    ///
    /// - `Fault`: part of the range is not backed by any segment
    /// - `Io`: the backing file could not be read
    fn read(&self, address: u64, buf: &mut [u8], physical: bool) -> VantageResult<()>;
}

/// Callback that fills a buffer starting at an offset into its segment.
pub type ReadCallback = dyn Fn(u64, &mut [u8]) -> VantageResult<()> + Send + Sync;

/// Where a segment's bytes come from.
#[derive(Clone)]
pub enum SegmentSource
{
    /// An in-memory buffer; bytes past its end read as zero.
    Bytes(Arc<[u8]>),
    /// A region of a file starting at `offset`; bytes past `file_size` read as
    /// zero (the `p_memsz > p_filesz` tail of a `PT_LOAD`).
    File
    {
        file: Arc<File>,
        offset: u64,
        file_size: u64,
    },
    /// A function called with the offset into the segment.
    Callback(Arc<ReadCallback>),
}

impl fmt::Debug for SegmentSource
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            SegmentSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            SegmentSource::File { offset, file_size, .. } => f
                .debug_struct("File")
                .field("offset", offset)
                .field("file_size", file_size)
                .finish_non_exhaustive(),
            SegmentSource::Callback(_) => f.write_str("Callback"),
        }
    }
}

impl SegmentSource
{
    fn read(&self, offset: u64, buf: &mut [u8]) -> VantageResult<()>
    {
        match self {
            SegmentSource::Bytes(bytes) => {
                let available = usize::try_from(offset)
                    .ok()
                    .and_then(|start| bytes.get(start..))
                    .unwrap_or(&[]);
                let copied = available.len().min(buf.len());
                buf[..copied].copy_from_slice(&available[..copied]);
                buf[copied..].fill(0);
                Ok(())
            }
            SegmentSource::File {
                file,
                offset: base,
                file_size,
            } => {
                let in_file = file_size.saturating_sub(offset);
                let copied = usize::try_from(in_file).map_or(buf.len(), |in_file| in_file.min(buf.len()));
                let position = base.checked_add(offset).ok_or(VantageError::Fault {
                    address: offset,
                    size: buf.len(),
                })?;
                file.read_exact_at(&mut buf[..copied], position)
                    .map_err(|err| file_read_error(position, copied, err))?;
                buf[copied..].fill(0);
                Ok(())
            }
            SegmentSource::Callback(callback) => callback(offset, buf),
        }
    }
}

fn file_read_error(position: u64, size: usize, err: io::Error) -> VantageError
{
    // procfs reports unmapped memory as EIO or a short read, and offsets past
    // i64::MAX as EINVAL
    let unmapped = matches!(err.raw_os_error(), Some(libc::EIO | libc::EINVAL));
    if unmapped || err.kind() == io::ErrorKind::UnexpectedEof {
        VantageError::Fault {
            address: position,
            size,
        }
    } else {
        VantageError::io(format!("reading {size} bytes at file offset 0x{position:x}"), err)
    }
}

/// One contiguous range of target memory.
#[derive(Debug, Clone)]
pub struct Segment
{
    virt_start: u64,
    phys_start: Option<u64>,
    size: u64,
    source: SegmentSource,
}

impl Segment
{
    /// A segment covering `[virt_start, virt_start + size)`.
    #[must_use]
    pub fn new(virt_start: u64, size: u64, source: SegmentSource) -> Self
    {
        Self {
            virt_start,
            phys_start: None,
            size,
            source,
        }
    }

    /// Also make the segment readable at physical address `phys_start`.
    #[must_use]
    pub fn with_physical(mut self, phys_start: u64) -> Self
    {
        self.phys_start = Some(phys_start);
        self
    }

    #[must_use]
    pub fn virt_start(&self) -> u64
    {
        self.virt_start
    }

    #[must_use]
    pub fn size(&self) -> u64
    {
        self.size
    }

    fn start(&self, physical: bool) -> Option<u64>
    {
        if physical {
            self.phys_start
        } else {
            Some(self.virt_start)
        }
    }

    fn end(&self) -> u64
    {
        self.virt_start + self.size
    }
}

/// A [`MemoryReader`] over a set of non-overlapping segments.
#[derive(Debug)]
pub struct SegmentReader
{
    platform: Platform,
    // sorted by virt_start
    segments: Vec<Segment>,
}

impl SegmentReader
{
    #[must_use]
    pub fn new(platform: Platform) -> Self
    {
        Self {
            platform,
            segments: Vec::new(),
        }
    }

    /// Add a segment.
    ///
    /// ## Errors
    ///
    /// - `MalformedInput`: the segment is empty, wraps around the address
    ///   space, ends above the word mask, or overlaps a segment that was
    ///   already added
    pub fn add_segment(&mut self, segment: Segment) -> VantageResult<()>
    {
        if segment.size == 0 {
            return Err(VantageError::MalformedInput(format!(
                "empty segment at 0x{:x}",
                segment.virt_start
            )));
        }
        if segment.virt_start.checked_add(segment.size).is_none() {
            return Err(VantageError::MalformedInput(format!(
                "segment at 0x{:x} with size 0x{:x} wraps around",
                segment.virt_start, segment.size
            )));
        }
        let last = segment.virt_start + (segment.size - 1);
        let mask = self.platform.word_size().mask();
        if last > mask {
            return Err(VantageError::MalformedInput(format!(
                "segment 0x{:x}-0x{:x} does not fit in a {}-byte address space",
                segment.virt_start,
                segment.end(),
                self.platform.word_size().bytes()
            )));
        }

        let index = self
            .segments
            .partition_point(|existing| existing.virt_start < segment.virt_start);
        let overlaps_prev = index > 0 && self.segments[index - 1].end() > segment.virt_start;
        let overlaps_next = self
            .segments
            .get(index)
            .is_some_and(|next| next.virt_start < segment.end());
        if overlaps_prev || overlaps_next {
            return Err(VantageError::MalformedInput(format!(
                "segment 0x{:x}-0x{:x} overlaps an existing segment",
                segment.virt_start,
                segment.end()
            )));
        }

        trace!(start = segment.virt_start, size = segment.size, "added memory segment");
        self.segments.insert(index, segment);
        Ok(())
    }

    #[must_use]
    pub fn segment_count(&self) -> usize
    {
        self.segments.len()
    }

    fn find(&self, address: u64, physical: bool) -> Option<(&Segment, u64)>
    {
        if physical {
            return self.segments.iter().find_map(|segment| {
                let start = segment.start(true)?;
                let offset = address.checked_sub(start)?;
                (offset < segment.size).then_some((segment, offset))
            });
        }
        let index = self.segments.partition_point(|segment| segment.virt_start <= address);
        let segment = &self.segments[index.checked_sub(1)?];
        let offset = address - segment.virt_start;
        (offset < segment.size).then_some((segment, offset))
    }
}

impl MemoryReader for SegmentReader
{
    fn platform(&self) -> Platform
    {
        self.platform
    }

    fn read(&self, address: u64, buf: &mut [u8], physical: bool) -> VantageResult<()>
    {
        if buf.is_empty() {
            return Ok(());
        }
        let mask = self.platform.word_size().mask();
        let beyond_mask = (buf.len() as u64 - 1)
            .checked_add(address)
            .map_or(true, |last| last > mask);
        if !physical && beyond_mask {
            return Err(VantageError::Fault {
                address,
                size: buf.len(),
            });
        }
        let mut done = 0usize;
        while done < buf.len() {
            let remaining = buf.len() - done;
            let current = address.checked_add(done as u64).ok_or(VantageError::Fault {
                address,
                size: remaining,
            })?;
            let (segment, offset) = self.find(current, physical).ok_or(VantageError::Fault {
                address: current,
                size: remaining,
            })?;
            let chunk = usize::try_from(segment.size - offset).map_or(remaining, |left| left.min(remaining));
            segment.source.read(offset, &mut buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }
}

/// A synthetic memory segment for [`Program::from_mock`](crate::Program::from_mock).
#[derive(Debug, Clone)]
pub struct MockSegment
{
    /// Virtual start address.
    pub virt_addr: u64,
    /// Physical start address, if the segment is also physically addressable.
    pub phys_addr: Option<u64>,
    /// Length of the segment in bytes.
    pub size: u64,
    source: SegmentSource,
}

impl MockSegment
{
    /// A segment whose contents are `bytes`.
    pub fn from_bytes(virt_addr: u64, bytes: impl Into<Vec<u8>>) -> Self
    {
        let bytes: Vec<u8> = bytes.into();
        Self {
            virt_addr,
            phys_addr: None,
            size: bytes.len() as u64,
            source: SegmentSource::Bytes(bytes.into()),
        }
    }

    /// A segment of `size` bytes whose contents come from `read`.
    ///
    /// `read` receives the offset into the segment and the buffer to fill.
    pub fn from_callback<F>(virt_addr: u64, size: u64, read: F) -> Self
    where
        F: Fn(u64, &mut [u8]) -> VantageResult<()> + Send + Sync + 'static,
    {
        Self {
            virt_addr,
            phys_addr: None,
            size,
            source: SegmentSource::Callback(Arc::new(read)),
        }
    }

    /// Also expose the segment at physical address `phys_addr`.
    #[must_use]
    pub fn at_physical(mut self, phys_addr: u64) -> Self
    {
        self.phys_addr = Some(phys_addr);
        self
    }
}

impl From<MockSegment> for Segment
{
    fn from(mock: MockSegment) -> Self
    {
        let segment = Segment::new(mock.virt_addr, mock.size, mock.source);
        match mock.phys_addr {
            Some(phys) => segment.with_physical(phys),
            None => segment,
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Write;

    use super::*;
    use crate::types::WordSize;

    fn reader() -> SegmentReader
    {
        SegmentReader::new(Platform::new(WordSize::Eight, true))
    }

    #[test]
    fn test_read_within_and_across_segments()
    {
        let mut reader = reader();
        reader.add_segment(MockSegment::from_bytes(0x1000, vec![1, 2, 3, 4]).into()).unwrap();
        reader.add_segment(MockSegment::from_bytes(0x1004, vec![5, 6]).into()).unwrap();

        let mut buf = [0u8; 6];
        reader.read(0x1000, &mut buf, false).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);

        let mut buf = [0u8; 2];
        reader.read(0x1003, &mut buf, false).unwrap();
        assert_eq!(buf, [4, 5]);
    }

    #[test]
    fn test_read_gap_faults_at_first_missing_byte()
    {
        let mut reader = reader();
        reader.add_segment(MockSegment::from_bytes(0x1000, vec![0; 16]).into()).unwrap();

        let mut buf = [0u8; 32];
        match reader.read(0x1008, &mut buf, false) {
            Err(VantageError::Fault { address, size }) => {
                assert_eq!(address, 0x1010);
                assert_eq!(size, 24);
            }
            other => panic!("expected fault, got {other:?}"),
        }
        assert!(matches!(reader.read(0x0fff, &mut [0u8; 1], false), Err(VantageError::Fault { .. })));
    }

    #[test]
    fn test_overlapping_segments_are_rejected()
    {
        let mut reader = reader();
        reader.add_segment(MockSegment::from_bytes(0x2000, vec![0; 0x100]).into()).unwrap();
        let below = reader.add_segment(MockSegment::from_bytes(0x1f80, vec![0; 0x100]).into());
        let above = reader.add_segment(MockSegment::from_bytes(0x20ff, vec![0; 0x10]).into());
        let empty = reader.add_segment(MockSegment::from_bytes(0x5000, Vec::new()).into());
        assert!(matches!(below, Err(VantageError::MalformedInput(_))));
        assert!(matches!(above, Err(VantageError::MalformedInput(_))));
        assert!(matches!(empty, Err(VantageError::MalformedInput(_))));
        assert!(reader.add_segment(MockSegment::from_bytes(0x2100, vec![0; 0x10]).into()).is_ok());
        assert_eq!(reader.segment_count(), 2);
    }

    #[test]
    fn test_physical_reads_use_physical_address()
    {
        let mut reader = reader();
        reader
            .add_segment(MockSegment::from_bytes(0xffff_8880_0000_0000, vec![9, 8, 7]).at_physical(0x10_0000).into())
            .unwrap();

        let mut buf = [0u8; 3];
        reader.read(0x10_0000, &mut buf, true).unwrap();
        assert_eq!(buf, [9, 8, 7]);
        assert!(reader.read(0x10_0000, &mut buf, false).is_err());
    }

    #[test]
    fn test_callback_receives_segment_offset()
    {
        let mut reader = reader();
        let segment = MockSegment::from_callback(0x4000, 0x1000, |offset, buf| {
            for (index, byte) in buf.iter_mut().enumerate() {
                *byte = ((offset + index as u64) & 0xff) as u8;
            }
            Ok(())
        });
        reader.add_segment(segment.into()).unwrap();

        let mut buf = [0u8; 4];
        reader.read(0x4010, &mut buf, false).unwrap();
        assert_eq!(buf, [0x10, 0x11, 0x12, 0x13]);
    }

    #[test]
    fn test_file_source_zero_fills_past_file_size()
    {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"\x00\x00abcd").unwrap();

        let mut reader = reader();
        let source = SegmentSource::File {
            file: Arc::new(file),
            offset: 2,
            file_size: 4,
        };
        reader.add_segment(Segment::new(0x8000, 8, source)).unwrap();

        let mut buf = [0xffu8; 8];
        reader.read(0x8000, &mut buf, false).unwrap();
        assert_eq!(&buf, b"abcd\0\0\0\0");
    }

    #[test]
    fn test_segments_stay_below_word_mask()
    {
        let mut reader = SegmentReader::new(Platform::new(WordSize::Four, true));
        let above = reader.add_segment(MockSegment::from_bytes(0x1_0000_0000, vec![0xaa; 16]).into());
        let straddling = reader.add_segment(MockSegment::from_bytes(0xffff_fff8, vec![0; 16]).into());
        assert!(matches!(above, Err(VantageError::MalformedInput(_))));
        assert!(matches!(straddling, Err(VantageError::MalformedInput(_))));

        reader.add_segment(MockSegment::from_bytes(0xffff_fff0, vec![7; 16]).into()).unwrap();
        let mut buf = [0u8; 4];
        reader.read(0xffff_fffc, &mut buf, false).unwrap();
        assert_eq!(buf, [7; 4]);
        assert!(matches!(
            reader.read(0xffff_fffc, &mut [0u8; 8], false),
            Err(VantageError::Fault { address: 0xffff_fffc, size: 8 })
        ));
    }

    #[test]
    fn test_procfs_read_errors_are_faults()
    {
        let eio = file_read_error(0x10, 8, io::Error::from_raw_os_error(libc::EIO));
        let einval = file_read_error(u64::MAX - 7, 8, io::Error::from_raw_os_error(libc::EINVAL));
        let other = file_read_error(0x10, 8, io::Error::from_raw_os_error(libc::EBADF));
        assert!(matches!(eio, VantageError::Fault { address: 0x10, size: 8 }));
        assert!(matches!(einval, VantageError::Fault { size: 8, .. }));
        assert!(matches!(other, VantageError::Io { .. }));
    }
}
