//! Backend initializers.
//!
//! Each module builds a [`Program`](crate::Program) for one kind of target
//! through a [`ProgramBuilder`](crate::program::ProgramBuilder):
//!
//! | Module | Target | Flags |
//! |---|---|---|
//! | [`core_dump`] | vmcore or process core | `IS_LINUX_KERNEL` for vmcores |
//! | [`kernel`] | running kernel | `IS_LINUX_KERNEL \| IS_LIVE` |
//! | [`pid`] | running process | `IS_LIVE` |
//! | [`mock`] | caller-supplied | none |

pub(crate) mod core_dump;
pub(crate) mod kernel;
pub(crate) mod mock;
pub(crate) mod pid;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DebugInfoConfig;
use crate::elf::ElfImage;
use crate::error::{VantageError, VantageResult};
use crate::formats::kallsyms::parse_symbol_map;
use crate::metadata::{FileMapping, KernelInfo, MappingTable};
use crate::symbol_index::{DuplicatePolicy, Symbol, SymbolTable};
use crate::type_index::DwarfTypeIndex;
use crate::types::Platform;

/// Report missing debug info at `warn` when the caller asked to be verbose.
fn report_missing(verbose: bool, message: &str)
{
    if verbose {
        warn!("{message}");
    } else {
        debug!("{message}");
    }
}

/// A file-backed address range reported by the target.
struct MappedRange
{
    path: String,
    start: u64,
    end: u64,
    file_offset: u64,
}

/// Open each mapped file once and build the mapping table.
///
/// Files that cannot be opened or are not ELF (deleted files, device
/// mappings, data files) are left out of the table.
fn build_mapping_table(ranges: impl IntoIterator<Item = MappedRange>, verbose: bool) -> VantageResult<MappingTable>
{
    let mut images: HashMap<String, Option<Arc<ElfImage>>> = HashMap::new();
    let mut mappings = Vec::new();
    for range in ranges {
        if range.start >= range.end {
            debug!(path = %range.path, start = range.start, "skipping empty mapping");
            continue;
        }
        let image = images.entry(range.path.clone()).or_insert_with(|| match ElfImage::open(&range.path) {
            Ok(image) => Some(image),
            Err(err) => {
                report_missing(verbose, &format!("could not open mapped file {}: {err}", range.path));
                None
            }
        });
        let Some(image) = image else {
            continue;
        };
        mappings.push(FileMapping {
            path: PathBuf::from(&range.path),
            elf: Arc::clone(image),
            start: range.start,
            end: range.end,
            file_offset: range.file_offset,
        });
    }
    MappingTable::new(mappings)
}

/// Locate and open the `vmlinux` for `release`.
///
/// ## Errors
///
/// - `Lookup`: nothing was found and the config does not allow that
/// - anything [`ElfImage::open`] returns for the file that was found
fn open_vmlinux(release: &str, config: &DebugInfoConfig, verbose: bool) -> VantageResult<Option<Arc<ElfImage>>>
{
    match config.find_vmlinux(release) {
        Some(path) => {
            debug!(path = %path.display(), release, "using vmlinux");
            ElfImage::open(path).map(Some)
        }
        None if config.allow_missing => {
            report_missing(verbose, &format!("could not find vmlinux for {release}; continuing without debug info"));
            Ok(None)
        }
        None => Err(VantageError::Lookup(format!(
            "could not find vmlinux for {release}; searched {}",
            config
                .vmlinux_candidates(release)
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Type index over `vmlinux`, empty without one.
fn kernel_type_index(platform: Platform, vmlinux: Option<&ElfImage>, verbose: bool) -> VantageResult<DwarfTypeIndex>
{
    let mut index = DwarfTypeIndex::new(platform);
    if let Some(vmlinux) = vmlinux {
        if index.add_image(vmlinux)? == 0 {
            report_missing(verbose, &format!("{} has no type information", vmlinux.path().display()));
        }
    }
    Ok(index)
}

/// `vmlinux` symbols moved by the KASLR offset.
fn vmlinux_symbols(platform: Platform, vmlinux: &ElfImage, kaslr_offset: u64) -> VantageResult<SymbolTable>
{
    platform.ensure_matches(vmlinux.platform(), &format!("symbols in {}", vmlinux.path().display()))?;
    let mask = platform.word_size().mask();
    let symbols = vmlinux.symbols()?.iter().map(|symbol| Symbol {
        address: symbol.address.wrapping_add(kaslr_offset) & mask,
        ..symbol.clone()
    });
    SymbolTable::build(platform, symbols, DuplicatePolicy::KeepFirst)
}

/// Kernel symbols from a `System.map`, for dumps without a `vmlinux`.
///
/// The table is empty when no map is found.
fn system_map_symbols(
    platform: Platform,
    info: &KernelInfo,
    config: &DebugInfoConfig,
    verbose: bool,
) -> VantageResult<SymbolTable>
{
    let release = info.os_release();
    let Some(path) = config.find_system_map(release) else {
        report_missing(verbose, &format!("no System.map for {release}; kernel symbols are unavailable"));
        return SymbolTable::build(platform, Vec::new(), DuplicatePolicy::KeepFirst);
    };
    debug!(path = %path.display(), release, "using System.map");
    let text = fs::read_to_string(&path).map_err(|err| VantageError::io(path.display().to_string(), err))?;
    let mask = platform.word_size().mask();
    let symbols = parse_symbol_map(&text)?.into_iter().flat_map(|(name, addresses)| {
        addresses
            .into_iter()
            .map(move |address| Symbol::new(name.clone(), address.wrapping_add(info.kaslr_offset()) & mask, 0))
    });
    SymbolTable::build(platform, symbols, DuplicatePolicy::KeepFirst)
}

/// Type index over every distinct file in a mapping table.
///
/// ## Errors
///
/// - `InconsistentState`: a mapped file was built for another word size or
///   byte order
fn userspace_type_index(platform: Platform, mappings: &MappingTable) -> VantageResult<DwarfTypeIndex>
{
    let mut index = DwarfTypeIndex::new(platform);
    for image in distinct_images(mappings) {
        index.add_image(&image)?;
    }
    Ok(index)
}

/// Symbols of every mapped file, moved to where the file is loaded.
///
/// ## Errors
///
/// - `InconsistentState`: a mapped file was built for another word size or
///   byte order
fn userspace_symbols(platform: Platform, mappings: &MappingTable) -> VantageResult<SymbolTable>
{
    let mask = platform.word_size().mask();
    let mut symbols = Vec::new();
    for image in distinct_images(mappings) {
        platform.ensure_matches(image.platform(), &format!("symbols in {}", image.path().display()))?;
        let Some(first) = mappings.for_path(image.path()).next() else {
            continue;
        };
        let bias = image.load_bias(first.start, first.file_offset);
        let image_symbols = match image.symbols() {
            Ok(image_symbols) => image_symbols,
            Err(err) => {
                debug!(path = %image.path().display(), error = %err, "no symbols");
                continue;
            }
        };
        symbols.extend(image_symbols.iter().map(|symbol| Symbol {
            address: symbol.address.wrapping_add(bias) & mask,
            ..symbol.clone()
        }));
    }
    SymbolTable::build(platform, symbols, DuplicatePolicy::KeepFirst)
}

/// One image per mapped path, in address order of first appearance.
fn distinct_images(mappings: &MappingTable) -> Vec<Arc<ElfImage>>
{
    let mut images: Vec<Arc<ElfImage>> = Vec::new();
    for mapping in mappings {
        if !images.iter().any(|image| Arc::ptr_eq(image, &mapping.elf)) {
            images.push(Arc::clone(&mapping.elf));
        }
    }
    images
}
