//! `/proc/kallsyms` and `System.map` symbol listings.
//!
//! Each line is `address type name`, optionally followed by `[module]` for
//! symbols of loadable modules. Unprivileged readers see every address as zero;
//! some tools print `(null)` instead.

use std::collections::HashMap;

use crate::error::{VantageError, VantageResult};
use crate::symbol_index::Symbol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KallsymsEntry
{
    pub address: u64,
    /// `nm`-style type letter (`T`, `t`, `D`, ...).
    pub kind: char,
    pub name: String,
    /// Module the symbol belongs to, `None` for the core kernel.
    pub module: Option<String>,
}

impl KallsymsEntry
{
    /// Text and data symbols, as opposed to absolute and section markers.
    #[must_use]
    pub fn is_text_or_data(&self) -> bool
    {
        matches!(self.kind.to_ascii_lowercase(), 't' | 'w' | 'd' | 'b' | 'r')
    }
}

fn parse_address(field: &str) -> Result<u64, std::num::ParseIntError>
{
    if field == "(null)" {
        return Ok(0);
    }
    u64::from_str_radix(field, 16)
}

/// Parse one listing line.
///
/// ## Errors
///
/// - `MalformedInput`: the line has fewer than three fields or a bad address
pub fn parse_line(line: &str) -> VantageResult<KallsymsEntry>
{
    let mut fields = line.split_whitespace();
    let (Some(address), Some(kind), Some(name)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(VantageError::MalformedInput(format!("symbol line {line:?} has too few fields")));
    };
    let address = parse_address(address).map_err(|err| VantageError::malformed(&format!("symbol line {line:?}"), err))?;
    let module = fields
        .next()
        .and_then(|module| module.strip_prefix('[')?.strip_suffix(']'))
        .map(str::to_string);

    Ok(KallsymsEntry {
        address,
        kind: kind.chars().next().unwrap_or('?'),
        name: name.to_string(),
        module,
    })
}

/// Parse a whole listing, skipping blank lines.
///
/// ## Errors
///
/// - `MalformedInput`: a line could not be parsed
pub fn parse_kallsyms(text: &str) -> VantageResult<Vec<KallsymsEntry>>
{
    text.lines().filter(|line| !line.trim().is_empty()).map(parse_line).collect()
}

/// Core-kernel text and data symbols of a listing, for a symbol index.
///
/// Sizes are unknown, so each symbol extends to the next one.
#[must_use]
pub fn kernel_symbols(entries: &[KallsymsEntry]) -> Vec<Symbol>
{
    entries
        .iter()
        .filter(|entry| entry.module.is_none() && entry.is_text_or_data())
        .map(|entry| Symbol::new(entry.name.clone(), entry.address, 0))
        .collect()
}

/// Every address each name appears at, in listing order.
///
/// ## Errors
///
/// - `MalformedInput`: a line could not be parsed
pub fn parse_symbol_map(text: &str) -> VantageResult<HashMap<String, Vec<u64>>>
{
    let mut symbols: HashMap<String, Vec<u64>> = HashMap::new();
    for entry in parse_kallsyms(text)? {
        symbols.entry(entry.name).or_default().push(entry.address);
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests
{
    use super::*;

    const LISTING: &str = "\
ffffffff81000000 T _text
ffffffff81000000 T startup_64
ffffffff82a0b000 D init_task
ffffffff81234560 t do_one_initcall
ffffffffc0a01000 t ext4_init_fs\t[ext4]
0000000000000000 A fixed_percpu_data
(null) t dup_name
ffffffff81999999 t dup_name
";

    #[test]
    fn test_parse_lines()
    {
        let entries = parse_kallsyms(LISTING).unwrap();
        assert_eq!(entries.len(), 8);
        assert_eq!(entries[2].name, "init_task");
        assert_eq!(entries[2].kind, 'D');
        assert_eq!(entries[4].module.as_deref(), Some("ext4"));
        assert_eq!(entries[6].address, 0);
    }

    #[test]
    fn test_kernel_symbols_skip_modules_and_absolute()
    {
        let entries = parse_kallsyms(LISTING).unwrap();
        let names: Vec<String> = kernel_symbols(&entries).into_iter().map(|symbol| symbol.name).collect();
        assert!(names.contains(&"startup_64".to_string()));
        assert!(!names.contains(&"ext4_init_fs".to_string()));
        assert!(!names.contains(&"fixed_percpu_data".to_string()));
    }

    #[test]
    fn test_symbol_map_collects_duplicates()
    {
        let map = parse_symbol_map(LISTING).unwrap();
        assert_eq!(map["dup_name"], vec![0, 0xffff_ffff_8199_9999]);
        assert_eq!(map["_text"], vec![0xffff_ffff_8100_0000]);
    }

    #[test]
    fn test_malformed_line()
    {
        assert!(matches!(parse_line("ffffffff81000000 T"), Err(VantageError::MalformedInput(_))));
        assert!(parse_line("xyz T name").is_err());
    }
}
