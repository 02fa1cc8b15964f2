//! # Type Index
//!
//! Named types of the target, with their byte sizes.
//!
//! [`DwarfTypeIndex`] reads type definitions out of the DWARF sections of one
//! or more [`ElfImage`]s. [`MockTypeIndex`] holds caller-supplied entries for
//! mock programs. Both answer pointer types (`"char *"`, `"struct page **"`)
//! from the word size.

use std::collections::HashMap;
use std::fmt;

use gimli::{constants, AttributeValue, DebuggingInformationEntry, Reader, Unit, UnitOffset};
use tracing::{debug, trace};

use crate::elf::{ElfImage, OwnedDwarf, OwnedReader};
use crate::error::{map_dwarf_error, VantageError, VantageResult};
use crate::types::Platform;

const MAX_TYPE_REF_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind
{
    Base,
    Struct,
    Union,
    Class,
    Enum,
    Typedef,
    Pointer,
}

impl TypeKind
{
    /// The C keyword that may prefix a name of this kind.
    fn keyword(self) -> Option<&'static str>
    {
        match self {
            TypeKind::Struct => Some("struct"),
            TypeKind::Union => Some("union"),
            TypeKind::Class => Some("class"),
            TypeKind::Enum => Some("enum"),
            _ => None,
        }
    }
}

impl fmt::Display for TypeKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            TypeKind::Base => "base",
            TypeKind::Struct => "struct",
            TypeKind::Union => "union",
            TypeKind::Class => "class",
            TypeKind::Enum => "enum",
            TypeKind::Typedef => "typedef",
            TypeKind::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

/// A named type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry
{
    pub name: String,
    pub kind: TypeKind,
    /// Size in bytes; `None` for incomplete types.
    pub size: Option<u64>,
}

/// Type lookups for a program.
pub trait TypeIndex: Send
{
    /// Word size and byte order the index was built for.
    fn platform(&self) -> Platform;

    /// Entry registered under exactly `name`.
    fn lookup(&self, name: &str) -> Option<&TypeEntry>;

    /// Number of named types.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Resolve a C type name.
    ///
    /// Accepts `struct`/`union`/`enum`/`class` prefixes and trailing `*`s;
    /// `"void *"` always resolves.
    fn find(&self, name: &str) -> Option<TypeEntry>
    {
        let name = name.trim();
        if let Some(pointee) = name.strip_suffix('*') {
            let pointee = pointee.trim_end();
            if pointee != "void" && self.find(pointee).is_none() {
                return None;
            }
            return Some(TypeEntry {
                name: name.to_string(),
                kind: TypeKind::Pointer,
                size: Some(u64::from(self.platform().word_size().bytes())),
            });
        }

        if let Some((keyword, rest)) = name.split_once(' ') {
            if let Some(entry) = self.lookup(rest.trim()) {
                if entry.kind.keyword() == Some(keyword) {
                    return Some(entry.clone());
                }
            }
        }
        self.lookup(name).cloned()
    }
}

/// A type definition for [`Program::from_mock`](crate::Program::from_mock).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockType
{
    pub name: String,
    pub kind: TypeKind,
    pub size: Option<u64>,
}

impl MockType
{
    pub fn new(name: impl Into<String>, kind: TypeKind, size: Option<u64>) -> Self
    {
        Self {
            name: name.into(),
            kind,
            size,
        }
    }
}

/// Type index over caller-supplied entries.
#[derive(Debug)]
pub struct MockTypeIndex
{
    platform: Platform,
    types: HashMap<String, TypeEntry>,
}

impl MockTypeIndex
{
    /// ## Errors
    ///
    /// - `MalformedInput`: a name is empty or appears twice, or a pointer type
    ///   is given a size other than the word size
    pub fn new(platform: Platform, types: impl IntoIterator<Item = MockType>) -> VantageResult<Self>
    {
        let word = u64::from(platform.word_size().bytes());
        let mut index = HashMap::new();
        for mock in types {
            if mock.name.trim().is_empty() {
                return Err(VantageError::MalformedInput("mock type with an empty name".to_string()));
            }
            if mock.kind == TypeKind::Pointer && mock.size.is_some_and(|size| size != word) {
                return Err(VantageError::MalformedInput(format!(
                    "pointer type {} must be {word} bytes",
                    mock.name
                )));
            }
            if index.contains_key(&mock.name) {
                return Err(VantageError::MalformedInput(format!("duplicate mock type {}", mock.name)));
            }
            index.insert(
                mock.name.clone(),
                TypeEntry {
                    name: mock.name,
                    kind: mock.kind,
                    size: mock.size,
                },
            );
        }
        Ok(Self { platform, types: index })
    }
}

impl TypeIndex for MockTypeIndex
{
    fn platform(&self) -> Platform
    {
        self.platform
    }

    fn lookup(&self, name: &str) -> Option<&TypeEntry>
    {
        self.types.get(name)
    }

    fn len(&self) -> usize
    {
        self.types.len()
    }
}

/// Type index built from DWARF debug info.
///
/// The first complete definition of a name wins, across every image added.
#[derive(Debug)]
pub struct DwarfTypeIndex
{
    platform: Platform,
    types: HashMap<String, TypeEntry>,
    images: usize,
}

impl DwarfTypeIndex
{
    #[must_use]
    pub fn new(platform: Platform) -> Self
    {
        Self {
            platform,
            types: HashMap::new(),
            images: 0,
        }
    }

    /// Index the named types defined in `image`'s debug info.
    ///
    /// Returns the number of new names.
    ///
    /// ## Errors
    ///
    /// - `InconsistentState`: the image's word size or byte order differs from
    ///   the index's
    /// - `MalformedInput`: the DWARF is corrupt
    pub fn add_image(&mut self, image: &ElfImage) -> VantageResult<usize>
    {
        self.platform
            .ensure_matches(image.platform(), &format!("debug info in {}", image.path().display()))?;
        if !image.has_debug_info() {
            debug!(path = %image.path().display(), "no DWARF type information");
            return Ok(0);
        }

        let dwarf = image.dwarf()?;
        let units = load_units(&dwarf)?;
        let walker = DieWalker { dwarf: &dwarf, units: &units, word: u64::from(self.platform.word_size().bytes()) };

        let before = self.types.len();
        for unit in &units {
            walker.collect(unit, &mut self.types)?;
        }
        self.images += 1;

        let added = self.types.len() - before;
        trace!(path = %image.path().display(), added, total = self.types.len(), "indexed DWARF types");
        Ok(added)
    }

    /// Number of images indexed so far.
    #[must_use]
    pub fn image_count(&self) -> usize
    {
        self.images
    }
}

impl TypeIndex for DwarfTypeIndex
{
    fn platform(&self) -> Platform
    {
        self.platform
    }

    fn lookup(&self, name: &str) -> Option<&TypeEntry>
    {
        self.types.get(name)
    }

    fn len(&self) -> usize
    {
        self.types.len()
    }
}

fn load_units(dwarf: &OwnedDwarf) -> VantageResult<Vec<Unit<OwnedReader>>>
{
    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers
        .next()
        .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
    {
        units.push(
            dwarf
                .unit(header)
                .map_err(|err| map_dwarf_error("parsing compilation unit", err))?,
        );
    }
    Ok(units)
}

struct DieWalker<'a>
{
    dwarf: &'a OwnedDwarf,
    units: &'a [Unit<OwnedReader>],
    word: u64,
}

impl DieWalker<'_>
{
    fn collect(&self, unit: &Unit<OwnedReader>, types: &mut HashMap<String, TypeEntry>) -> VantageResult<()>
    {
        let mut cursor = unit.entries();
        while let Some((_delta, entry)) = cursor.next_dfs().map_err(|err| map_dwarf_error("traversing DIE tree", err))? {
            let Some(kind) = kind_of(entry.tag()) else {
                continue;
            };
            if is_declaration(entry)? {
                continue;
            }
            let Some(name) = self.entry_name(unit, entry)? else {
                continue;
            };
            if types.contains_key(&name) {
                continue;
            }
            let size = self.entry_size(unit, entry, 0)?;
            types.insert(name.clone(), TypeEntry { name, kind, size });
        }
        Ok(())
    }

    fn entry_name(
        &self,
        unit: &Unit<OwnedReader>,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    ) -> VantageResult<Option<String>>
    {
        let Some(attr) = entry
            .attr(constants::DW_AT_name)
            .map_err(|err| map_dwarf_error("reading DW_AT_name", err))?
        else {
            return Ok(None);
        };
        let reader = self
            .dwarf
            .attr_string(unit, attr.value())
            .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
        let name = reader
            .to_string_lossy()
            .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
            .into_owned();
        Ok((!name.is_empty()).then_some(name))
    }

    /// `DW_AT_byte_size`, or the size of what `DW_AT_type` refers to.
    fn entry_size(
        &self,
        unit: &Unit<OwnedReader>,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
        depth: usize,
    ) -> VantageResult<Option<u64>>
    {
        if depth >= MAX_TYPE_REF_DEPTH {
            return Ok(None);
        }
        match entry.tag() {
            constants::DW_TAG_pointer_type
            | constants::DW_TAG_reference_type
            | constants::DW_TAG_rvalue_reference_type
            | constants::DW_TAG_ptr_to_member_type => {
                return Ok(Some(self.word));
            }
            _ => {}
        }

        if let Some(attr) = entry
            .attr(constants::DW_AT_byte_size)
            .map_err(|err| map_dwarf_error("reading DW_AT_byte_size", err))?
        {
            if let Some(bytes) = attr.udata_value() {
                return Ok(Some(bytes));
            }
        }

        // typedefs and qualifiers take the size of the type they name
        let Some(attr) = entry
            .attr(constants::DW_AT_type)
            .map_err(|err| map_dwarf_error("reading DW_AT_type", err))?
        else {
            return Ok(None);
        };
        match attr.value() {
            AttributeValue::UnitRef(offset) => self.size_at(unit, offset, depth + 1),
            AttributeValue::DebugInfoRef(offset) => {
                let target = gimli::UnitSectionOffset::from(offset);
                match self
                    .units
                    .iter()
                    .find_map(|candidate| target.to_unit_offset(candidate).map(|offset| (candidate, offset)))
                {
                    Some((target_unit, offset)) => self.size_at(target_unit, offset, depth + 1),
                    None => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn size_at(&self, unit: &Unit<OwnedReader>, offset: UnitOffset<usize>, depth: usize) -> VantageResult<Option<u64>>
    {
        let entry = unit
            .entry(offset)
            .map_err(|err| map_dwarf_error("resolving type reference", err))?;
        self.entry_size(unit, &entry, depth)
    }
}

fn kind_of(tag: gimli::DwTag) -> Option<TypeKind>
{
    match tag {
        constants::DW_TAG_base_type => Some(TypeKind::Base),
        constants::DW_TAG_structure_type => Some(TypeKind::Struct),
        constants::DW_TAG_class_type => Some(TypeKind::Class),
        constants::DW_TAG_union_type => Some(TypeKind::Union),
        constants::DW_TAG_enumeration_type => Some(TypeKind::Enum),
        constants::DW_TAG_typedef => Some(TypeKind::Typedef),
        _ => None,
    }
}

fn is_declaration(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> VantageResult<bool>
{
    let attr = entry
        .attr(constants::DW_AT_declaration)
        .map_err(|err| map_dwarf_error("reading DW_AT_declaration", err))?;
    Ok(matches!(attr.map(|attr| attr.value()), Some(AttributeValue::Flag(true))))
}
