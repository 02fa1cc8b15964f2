//! Programs over the running kernel.
//!
//! Memory comes from `/proc/kcore`. The release and KASLR offset come from the
//! VMCOREINFO note that kcore carries on Linux 4.19 and later; older kernels
//! export the note's physical location in `/sys/kernel/vmcoreinfo` instead,
//! and as a last resort the release is read from procfs and the offset is
//! worked out from `/proc/kallsyms`.

use std::fs;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{kernel_type_index, open_vmlinux, report_missing, vmlinux_symbols};
use crate::config::DebugInfoConfig;
use crate::elf::ElfImage;
use crate::error::{VantageError, VantageResult};
use crate::escape::c_string;
use crate::formats::core::CoreFile;
use crate::formats::kallsyms::{kernel_symbols, parse_kallsyms, KallsymsEntry};
use crate::formats::vmcoreinfo::{self, parse_sysfs_location, parse_vmcoreinfo};
use crate::memory::SegmentReader;
use crate::metadata::{KernelInfo, TargetMetadata};
use crate::program::{Program, ProgramBuilder, ProgramFlags};
use crate::symbol_index::{DuplicatePolicy, SymbolTable};

const KCORE_PATH: &str = "/proc/kcore";
const SYSFS_VMCOREINFO_PATH: &str = "/sys/kernel/vmcoreinfo";
const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";
const KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Upper bound on the sysfs-reported VMCOREINFO size.
const MAX_VMCOREINFO_SIZE: u64 = 1 << 20;

#[instrument(skip(config))]
pub(crate) fn initialize(verbose: bool, config: &DebugInfoConfig) -> VantageResult<Program>
{
    let kcore = CoreFile::open(KCORE_PATH)?;
    let platform = kcore.platform();
    let mut builder = ProgramBuilder::new("kernel", platform);
    let kcore = builder.stage("kcore", kcore)?;

    let mut reader = SegmentReader::new(platform);
    let segments = kcore.with(|kcore| kcore.add_segments_to(&mut reader, true))?;
    debug!(segments, "mapped /proc/kcore");
    builder.install_reader(Box::new(reader))?;

    let note = kcore.with(|kcore| kcore.find_note(vmcoreinfo::NOTE_NAME, None).map(|note| note.desc.clone()))?;
    drop(builder.claim(kcore)?);

    let known = match note {
        Some(desc) => Some(parse_vmcoreinfo(&desc)?),
        None => read_sysfs_vmcoreinfo(&builder),
    };
    let release = match &known {
        Some(info) => info.os_release().to_string(),
        None => read_osrelease()?,
    };

    let vmlinux = open_vmlinux(&release, config, verbose)?;
    if let Some(vmlinux) = &vmlinux {
        check_banner(vmlinux, &release)?;
    }

    let kallsyms = || -> VantageResult<Vec<KallsymsEntry>> {
        let text = fs::read_to_string(KALLSYMS_PATH).map_err(|err| VantageError::io(KALLSYMS_PATH, err))?;
        let entries = parse_kallsyms(&text)?;
        // kptr_restrict hides every address from unprivileged readers
        if entries.iter().all(|entry| entry.address == 0) {
            return Err(VantageError::Lookup(format!("{KALLSYMS_PATH} shows no addresses")));
        }
        Ok(entries)
    };

    let info = match known {
        Some(info) => info,
        None => {
            let offset = fallback_kaslr_offset(vmlinux.as_deref(), kallsyms, config, verbose)?;
            KernelInfo::new(release, offset)?
        }
    };
    debug!(release = info.os_release(), kaslr_offset = info.kaslr_offset(), "running kernel");
    builder.set_metadata(TargetMetadata::Kernel(info.clone()))?;

    builder.install_type_index(Box::new(kernel_type_index(platform, vmlinux.as_deref(), verbose)?))?;

    let symbols = match &vmlinux {
        Some(vmlinux) => vmlinux_symbols(platform, vmlinux, info.kaslr_offset())?,
        None => {
            report_missing(verbose, "using /proc/kallsyms for kernel symbols");
            SymbolTable::build(platform, kernel_symbols(&kallsyms()?), DuplicatePolicy::KeepFirst)?
        }
    };
    builder.install_symbol_index(Box::new(symbols))?;

    builder.finish(ProgramFlags::IS_LINUX_KERNEL | ProgramFlags::IS_LIVE)
}

/// VMCOREINFO read from physical memory at the location sysfs reports.
fn read_sysfs_vmcoreinfo(builder: &ProgramBuilder) -> Option<KernelInfo>
{
    let attempt = || -> VantageResult<KernelInfo> {
        let text =
            fs::read_to_string(SYSFS_VMCOREINFO_PATH).map_err(|err| VantageError::io(SYSFS_VMCOREINFO_PATH, err))?;
        let (address, size) = parse_sysfs_location(&text)?;
        if size == 0 || size > MAX_VMCOREINFO_SIZE {
            return Err(VantageError::MalformedInput(format!("VMCOREINFO size 0x{size:x}")));
        }
        let mut note = vec![0u8; size as usize];
        builder.read(address, &mut note, true)?;
        parse_vmcoreinfo(note_desc(&note, builder.platform().is_little_endian()).unwrap_or(&note))
    };
    match attempt() {
        Ok(info) => Some(info),
        Err(err) => {
            debug!(error = %err, "no VMCOREINFO in sysfs");
            None
        }
    }
}

/// Descriptor of the ELF note at the start of `note`.
fn note_desc(note: &[u8], little_endian: bool) -> Option<&[u8]>
{
    let word = |offset: usize| -> Option<usize> {
        let bytes: [u8; 4] = note.get(offset..offset + 4)?.try_into().ok()?;
        let value = if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        };
        usize::try_from(value).ok()
    };
    let name_size = word(0)?;
    let desc_size = word(4)?;
    let desc_start = 12 + ((name_size + 3) & !3);
    note.get(desc_start..desc_start.checked_add(desc_size)?)
}

fn read_osrelease() -> VantageResult<String>
{
    let release = fs::read_to_string(OSRELEASE_PATH).map_err(|err| VantageError::io(OSRELEASE_PATH, err))?;
    Ok(release.trim_end().to_string())
}

/// Reject a `vmlinux` built for some other release.
fn check_banner(vmlinux: &Arc<ElfImage>, release: &str) -> VantageResult<()>
{
    let banner = format!("Linux version {release} ");
    match vmlinux.section_contains(".rodata", banner.as_bytes()) {
        Some(false) => Err(VantageError::InconsistentState(format!(
            "{} is not the vmlinux of the running kernel {}",
            vmlinux.path().display(),
            c_string(release.as_bytes())
        ))),
        Some(true) | None => Ok(()),
    }
}

/// KASLR offset of a kernel whose VMCOREINFO could not be read.
///
/// Without a `vmlinux` nothing is relocated by the offset, so it is 0.
///
/// ## Errors
///
/// Whatever stopped the offset from being derived, unless the config allows
/// missing debug info.
fn fallback_kaslr_offset(
    vmlinux: Option<&ElfImage>,
    kallsyms: impl FnOnce() -> VantageResult<Vec<KallsymsEntry>>,
    config: &DebugInfoConfig,
    verbose: bool,
) -> VantageResult<u64>
{
    let Some(vmlinux) = vmlinux else {
        return Ok(0);
    };
    match kallsyms().and_then(|entries| kaslr_from_kallsyms(vmlinux, &entries)) {
        Ok(offset) => Ok(offset),
        Err(err) if config.allow_missing => {
            report_missing(verbose, &format!("cannot determine the KASLR offset ({err}); assuming none"));
            Ok(0)
        }
        Err(err) => Err(err),
    }
}

/// Runtime address of `_stext` minus its link-time address.
fn kaslr_from_kallsyms(vmlinux: &ElfImage, entries: &[KallsymsEntry]) -> VantageResult<u64>
{
    let runtime = entries
        .iter()
        .find(|entry| entry.name == "_stext" && entry.module.is_none())
        .map(|entry| entry.address);
    let Some(runtime) = runtime.filter(|&address| address != 0) else {
        return Err(VantageError::Lookup(format!("{KALLSYMS_PATH} has no _stext")));
    };
    let Some(linked) = vmlinux.symbol_address("_stext")? else {
        return Err(VantageError::Lookup(format!("{} has no _stext", vmlinux.path().display())));
    };
    Ok(runtime.wrapping_sub(linked))
}

#[cfg(test)]
mod tests
{
    use super::*;

    use crate::types::{Platform, WordSize};

    #[test]
    fn test_note_desc_skips_padded_name()
    {
        let mut note = Vec::new();
        note.extend_from_slice(&11u32.to_le_bytes());
        note.extend_from_slice(&6u32.to_le_bytes());
        note.extend_from_slice(&0u32.to_le_bytes());
        note.extend_from_slice(b"VMCOREINFO\0\0");
        note.extend_from_slice(b"A=1\nB\0\0");
        assert_eq!(note_desc(&note, true), Some(&b"A=1\nB\0"[..]));
        assert_eq!(note_desc(&note[..20], true), None);
    }

    fn stext(address: u64) -> KallsymsEntry
    {
        KallsymsEntry {
            address,
            kind: 'T',
            name: "_stext".to_string(),
            module: None,
        }
    }

    #[test]
    fn test_kaslr_offset_requires_kallsyms()
    {
        let vmlinux = ElfImage::empty("/boot/vmlinux-test", Platform::new(WordSize::Eight, true));
        let config = DebugInfoConfig::default();
        let hidden = || -> VantageResult<Vec<KallsymsEntry>> {
            Err(VantageError::Lookup(format!("{KALLSYMS_PATH} shows no addresses")))
        };

        let err = fallback_kaslr_offset(Some(&vmlinux), hidden, &config, false).unwrap_err();
        assert!(matches!(err, VantageError::Lookup(_)));

        let config = config.allow_missing(true);
        assert_eq!(fallback_kaslr_offset(Some(&vmlinux), hidden, &config, false).unwrap(), 0);
    }

    #[test]
    fn test_kaslr_offset_requires_stext()
    {
        let vmlinux = ElfImage::empty("/boot/vmlinux-test", Platform::new(WordSize::Eight, true));
        let config = DebugInfoConfig::default();

        let err = kaslr_from_kallsyms(&vmlinux, &[stext(0)]).unwrap_err();
        assert!(matches!(err, VantageError::Lookup(_)));
        assert!(fallback_kaslr_offset(Some(&vmlinux), || Ok(vec![stext(0)]), &config, false).is_err());
        // an image without a symbol table cannot supply the link-time address
        assert!(kaslr_from_kallsyms(&vmlinux, &[stext(0xffff_ffff_9a00_0000)]).is_err());
    }

    #[test]
    fn test_kaslr_offset_without_vmlinux_is_zero()
    {
        let config = DebugInfoConfig::default();
        let never_read = || -> VantageResult<Vec<KallsymsEntry>> { panic!("kallsyms read without a vmlinux") };
        assert_eq!(fallback_kaslr_offset(None, never_read, &config, false).unwrap(), 0);
    }
}
