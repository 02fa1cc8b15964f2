//! # Symbol Index
//!
//! Name to address and address to name lookup for a program.
//!
//! Every backend fills a [`SymbolTable`]:
//!
//! - kernel targets from the vmlinux symbol table (shifted by the KASLR offset)
//!   or, on a live kernel without vmlinux, from `/proc/kallsyms`
//! - userspace targets from each mapped ELF file (shifted by its load bias)
//! - mock programs from the caller's [`MockSymbol`] list

use std::collections::HashMap;
use std::fmt;

use rustc_demangle::try_demangle;
use tracing::trace;

use crate::error::{VantageError, VantageResult};
use crate::types::Platform;

/// A named address in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol
{
    pub name: String,
    pub address: u64,
    /// Size in bytes; 0 when unknown.
    pub size: u64,
}

impl Symbol
{
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self
    {
        Self {
            name: name.into(),
            address,
            size,
        }
    }

    /// Human-readable form of a Rust mangled name, or the name unchanged.
    #[must_use]
    pub fn demangled(&self) -> String
    {
        match try_demangle(&self.name) {
            Ok(demangled) => format!("{demangled:#}"),
            Err(_) => self.name.clone(),
        }
    }

    fn contains(&self, address: u64) -> bool
    {
        address >= self.address && address - self.address < self.size
    }
}

impl fmt::Display for Symbol
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} (0x{:x}, {} bytes)", self.name, self.address, self.size)
    }
}

/// Symbol lookups for a program.
pub trait SymbolIndex: Send
{
    /// Word size and byte order the index was built for.
    fn platform(&self) -> Platform;

    /// Symbol called `name`.
    fn find_by_name(&self, name: &str) -> Option<&Symbol>;

    /// Symbol covering `address`.
    ///
    /// Sized symbols match only inside their extent. Symbols of unknown size
    /// match any address up to the next symbol.
    fn find_by_address(&self, address: u64) -> Option<&Symbol>;

    /// Number of symbols.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

/// A symbol definition for [`Program::from_mock`](crate::Program::from_mock).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSymbol
{
    pub name: String,
    pub address: u64,
    pub size: u64,
}

impl MockSymbol
{
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self
    {
        Self {
            name: name.into(),
            address,
            size,
        }
    }
}

impl From<MockSymbol> for Symbol
{
    fn from(mock: MockSymbol) -> Self
    {
        Symbol::new(mock.name, mock.address, mock.size)
    }
}

/// What to do when two symbols share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy
{
    /// Fail with `MalformedInput`.
    Reject,
    /// Keep the one added first for name lookups; all of them stay visible to
    /// address lookups. Real symbol tables routinely repeat local names.
    KeepFirst,
}

/// Address-sorted symbol table with a name index.
#[derive(Debug)]
pub struct SymbolTable
{
    platform: Platform,
    // sorted by address, then by insertion order
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
    max_size: u64,
}

impl SymbolTable
{
    /// Build a table from `symbols`.
    ///
    /// ## Errors
    ///
    /// - `MalformedInput`: a name repeats and `duplicates` is
    ///   [`DuplicatePolicy::Reject`], or an address does not fit the
    ///   platform's word size
    pub fn build(
        platform: Platform,
        symbols: impl IntoIterator<Item = Symbol>,
        duplicates: DuplicatePolicy,
    ) -> VantageResult<Self>
    {
        let mask = platform.word_size().mask();
        let symbols: Vec<Symbol> = symbols.into_iter().collect();
        if let Some(symbol) = symbols.iter().find(|symbol| symbol.address & !mask != 0) {
            return Err(VantageError::MalformedInput(format!(
                "symbol {} at 0x{:x} does not fit a {} address",
                symbol.name,
                symbol.address,
                platform.word_size()
            )));
        }

        if duplicates == DuplicatePolicy::Reject {
            let mut seen = HashMap::with_capacity(symbols.len());
            for symbol in &symbols {
                if let Some(previous) = seen.insert(symbol.name.as_str(), symbol.address) {
                    return Err(VantageError::MalformedInput(format!(
                        "duplicate symbol {} at 0x{:x} and 0x{:x}",
                        symbol.name, previous, symbol.address
                    )));
                }
            }
        }

        // Stable, so equal addresses keep their insertion order.
        let mut order: Vec<usize> = (0..symbols.len()).collect();
        order.sort_by_key(|&index| symbols[index].address);
        let mut position = vec![0usize; symbols.len()];
        for (sorted_index, &original_index) in order.iter().enumerate() {
            position[original_index] = sorted_index;
        }

        let mut by_name = HashMap::with_capacity(symbols.len());
        for (original_index, symbol) in symbols.iter().enumerate() {
            by_name.entry(symbol.name.clone()).or_insert(position[original_index]);
        }

        let max_size = symbols.iter().map(|symbol| symbol.size).max().unwrap_or(0);
        let mut slots: Vec<Option<Symbol>> = symbols.into_iter().map(Some).collect();
        let sorted: Vec<Symbol> = order.iter().filter_map(|&index| slots[index].take()).collect();

        trace!(count = sorted.len(), %platform, "built symbol table");
        Ok(Self {
            platform,
            symbols: sorted,
            by_name,
            max_size,
        })
    }

    /// Symbols in address order.
    pub fn iter(&self) -> std::slice::Iter<'_, Symbol>
    {
        self.symbols.iter()
    }
}

impl SymbolIndex for SymbolTable
{
    fn platform(&self) -> Platform
    {
        self.platform
    }

    fn find_by_name(&self, name: &str) -> Option<&Symbol>
    {
        self.by_name.get(name).map(|&index| &self.symbols[index])
    }

    fn find_by_address(&self, address: u64) -> Option<&Symbol>
    {
        let end = self.symbols.partition_point(|symbol| symbol.address <= address);
        let candidates = &self.symbols[..end];

        // innermost sized symbol first; nothing starting more than max_size below can cover address
        let sized = candidates
            .iter()
            .rev()
            .take_while(|symbol| address - symbol.address < self.max_size)
            .find(|symbol| symbol.contains(address));
        if sized.is_some() {
            return sized;
        }
        let nearest = candidates.last()?;
        (nearest.size == 0).then_some(nearest)
    }

    fn len(&self) -> usize
    {
        self.symbols.len()
    }
}
