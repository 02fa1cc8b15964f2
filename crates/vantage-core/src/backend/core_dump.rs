//! Programs over ELF core dumps.
//!
//! A dump with a VMCOREINFO note is a kernel vmcore; its types and symbols come
//! from the matching `vmlinux`, or symbols alone from `System.map` when the
//! configuration allows running without one. Otherwise the `NT_FILE` note says
//! which files the process had mapped, and those files provide types and
//! symbols.

use std::path::Path;

use tracing::{debug, instrument};

use super::{
    build_mapping_table, kernel_type_index, open_vmlinux, system_map_symbols, userspace_symbols, userspace_type_index,
    vmlinux_symbols, MappedRange,
};
use crate::config::DebugInfoConfig;
use crate::error::{VantageError, VantageResult};
use crate::formats::core::CoreFile;
use crate::formats::nt_file::{self, parse_nt_file};
use crate::formats::vmcoreinfo::{self, parse_vmcoreinfo};
use crate::memory::SegmentReader;
use crate::metadata::TargetMetadata;
use crate::program::{Program, ProgramBuilder, ProgramFlags};

#[instrument(skip(config), fields(path = %path.display()))]
pub(crate) fn initialize(path: &Path, verbose: bool, config: &DebugInfoConfig) -> VantageResult<Program>
{
    let core = CoreFile::open(path)?;
    let platform = core.platform();
    let mut builder = ProgramBuilder::new("core-dump", platform);
    let core = builder.stage("core-file", core)?;

    let vmcoreinfo = core.with(|core| {
        core.find_note(vmcoreinfo::NOTE_NAME, None)
            .map(|note| note.desc.clone())
    })?;
    let is_kernel = vmcoreinfo.is_some();

    let mut reader = SegmentReader::new(platform);
    let segments = core.with(|core| core.add_segments_to(&mut reader, is_kernel))?;
    debug!(segments, is_kernel, "mapped core segments");
    builder.install_reader(Box::new(reader))?;

    let metadata = match vmcoreinfo {
        Some(desc) => TargetMetadata::Kernel(parse_vmcoreinfo(&desc)?),
        None => {
            let desc = core
                .with(|core| {
                    core.find_note(nt_file::NOTE_NAME, Some(nt_file::NT_FILE))
                        .map(|note| note.desc.clone())
                })?
                .ok_or_else(|| {
                    VantageError::MalformedInput(format!(
                        "{} has neither a VMCOREINFO nor an NT_FILE note",
                        path.display()
                    ))
                })?;
            let ranges = parse_nt_file(&desc, platform)?.into_iter().map(|entry| MappedRange {
                path: entry.path,
                start: entry.start,
                end: entry.end,
                file_offset: entry.file_offset,
            });
            TargetMetadata::Userspace(build_mapping_table(ranges, verbose)?)
        }
    };
    builder.set_metadata(metadata)?;

    // the reader keeps its own handle to the dump file
    drop(builder.claim(core)?);

    if is_kernel {
        let info = builder.with_metadata(|metadata| metadata.kernel_info().cloned())??;
        let vmlinux = open_vmlinux(info.os_release(), config, verbose)?;

        builder.install_type_index(Box::new(kernel_type_index(platform, vmlinux.as_deref(), verbose)?))?;

        let symbols = match &vmlinux {
            Some(vmlinux) => vmlinux_symbols(platform, vmlinux, info.kaslr_offset())?,
            None => system_map_symbols(platform, &info, config, verbose)?,
        };
        builder.install_symbol_index(Box::new(symbols))?;
        builder.finish(ProgramFlags::IS_LINUX_KERNEL)
    } else {
        let mappings = builder.with_metadata(|metadata| metadata.mappings().cloned())??;
        builder.install_type_index(Box::new(userspace_type_index(platform, &mappings)?))?;
        builder.install_symbol_index(Box::new(userspace_symbols(platform, &mappings)?))?;
        builder.finish(ProgramFlags::empty())
    }
}
