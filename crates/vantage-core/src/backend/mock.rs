//! Programs over caller-supplied memory, types and symbols.

use tracing::instrument;

use crate::error::VantageResult;
use crate::memory::{MockSegment, SegmentReader};
use crate::metadata::{MappingTable, TargetMetadata};
use crate::program::{Program, ProgramBuilder, ProgramFlags};
use crate::symbol_index::{DuplicatePolicy, MockSymbol, Symbol, SymbolTable};
use crate::type_index::{MockType, MockTypeIndex};
use crate::types::{Platform, WordSize};

#[instrument(skip(segments, types, symbols))]
pub(crate) fn initialize(
    word_size: u8,
    little_endian: bool,
    segments: Vec<MockSegment>,
    types: Vec<MockType>,
    symbols: Vec<MockSymbol>,
) -> VantageResult<Program>
{
    let platform = Platform::new(WordSize::try_from(word_size)?, little_endian);
    let mut builder = ProgramBuilder::new("mock", platform);

    let mut reader = SegmentReader::new(platform);
    for segment in segments {
        reader.add_segment(segment.into())?;
    }
    builder.install_reader(Box::new(reader))?;

    builder.set_metadata(TargetMetadata::Userspace(MappingTable::default()))?;

    builder.install_type_index(Box::new(MockTypeIndex::new(platform, types)?))?;

    let symbols = SymbolTable::build(platform, symbols.into_iter().map(Symbol::from), DuplicatePolicy::Reject)?;
    builder.install_symbol_index(Box::new(symbols))?;

    builder.finish(ProgramFlags::empty())
}
