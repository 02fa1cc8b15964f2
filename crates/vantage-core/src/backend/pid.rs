//! Programs over running processes.
//!
//! Memory is read through `/proc/<pid>/mem` and mapped files are listed in
//! `/proc/<pid>/maps`. The process is not stopped or traced.

use std::fs::{self, File};
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{build_mapping_table, userspace_symbols, userspace_type_index, MappedRange};
use crate::elf::probe_platform;
use crate::error::{VantageError, VantageResult};
use crate::formats::proc_maps::parse_maps;
use crate::memory::{Segment, SegmentReader, SegmentSource};
use crate::metadata::TargetMetadata;
use crate::program::{Program, ProgramBuilder, ProgramFlags};
use crate::types::ProcessId;

#[instrument(fields(pid = %pid))]
pub(crate) fn initialize(pid: ProcessId) -> VantageResult<Program>
{
    let dir = pid.proc_dir();
    if !dir.is_dir() {
        return Err(VantageError::TargetNotFound(format!("no process with pid {pid}")));
    }

    let platform = probe_platform(&pid.proc_path("exe"))?;
    let mut builder = ProgramBuilder::new("pid", platform);

    let mem_path = pid.proc_path("mem");
    let mem = File::open(&mem_path).map_err(|err| VantageError::io(mem_path.display().to_string(), err))?;
    // the top byte of a 64-bit space is not representable; nothing maps it
    let size = platform.word_size().mask().saturating_add(1);
    let mut reader = SegmentReader::new(platform);
    reader.add_segment(Segment::new(
        0,
        size,
        SegmentSource::File {
            file: Arc::new(mem),
            offset: 0,
            file_size: size,
        },
    ))?;
    builder.install_reader(Box::new(reader))?;

    let maps_path = pid.proc_path("maps");
    let maps = fs::read_to_string(&maps_path).map_err(|err| VantageError::io(maps_path.display().to_string(), err))?;
    let ranges = parse_maps(&maps)?
        .into_iter()
        .filter(|entry| entry.is_file_backed())
        .filter_map(|entry| {
            Some(MappedRange {
                path: entry.path?,
                start: entry.start,
                end: entry.end,
                file_offset: entry.offset,
            })
        });
    let mappings = build_mapping_table(ranges, false)?;
    debug!(mappings = mappings.len(), "mapped files");

    builder.install_type_index(Box::new(userspace_type_index(platform, &mappings)?))?;
    builder.install_symbol_index(Box::new(userspace_symbols(platform, &mappings)?))?;
    builder.set_metadata(TargetMetadata::Userspace(mappings))?;

    builder.finish(ProgramFlags::IS_LIVE)
}
