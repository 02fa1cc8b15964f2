//! `/proc/<pid>/maps` lines.
//!
//! ```text
//! 55d0c6a00000-55d0c6a02000 r--p 00000000 fd:01 1048602    /usr/bin/cat
//! 7ffd1c9e0000-7ffd1ca01000 rw-p 00000000 00:00 0          [stack]
//! ```

use crate::error::{VantageError, VantageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsEntry
{
    pub start: u64,
    pub end: u64,
    /// `rwxp` / `rwxs` flags as printed.
    pub perms: String,
    pub offset: u64,
    /// `major:minor` of the backing device.
    pub dev: String,
    pub inode: u64,
    /// File path, pseudo-path like `[heap]`, or `None` for anonymous memory.
    pub path: Option<String>,
}

impl MapsEntry
{
    /// Whether the mapping is backed by a regular file.
    #[must_use]
    pub fn is_file_backed(&self) -> bool
    {
        self.inode != 0 && self.path.as_deref().is_some_and(|path| path.starts_with('/'))
    }
}

/// Parse the whole contents of a maps file.
///
/// ## Errors
///
/// - `MalformedInput`: a line does not have the expected fields
pub fn parse_maps(text: &str) -> VantageResult<Vec<MapsEntry>>
{
    text.lines().filter(|line| !line.trim().is_empty()).map(parse_maps_line).collect()
}

/// Parse a single maps line.
///
/// ## Errors
///
/// - `MalformedInput`: the line does not have the expected fields
pub fn parse_maps_line(line: &str) -> VantageResult<MapsEntry>
{
    let malformed = |what: &str| VantageError::MalformedInput(format!("maps line {line:?}: {what}"));
    let hex = |field: &str, what: &str| u64::from_str_radix(field, 16).map_err(|_| malformed(what));

    let mut rest = line;
    let mut fields = [""; 5];
    for field in &mut fields {
        let (value, tail) = take_field(rest).ok_or_else(|| malformed("too few fields"))?;
        *field = value;
        rest = tail;
    }
    let [range, perms, offset, dev, inode_field] = fields;
    let path = rest.trim();

    let (start, end) = range.split_once('-').ok_or_else(|| malformed("address range"))?;
    let inode = inode_field.parse().map_err(|_| malformed("inode"))?;

    Ok(MapsEntry {
        start: hex(start, "start address")?,
        end: hex(end, "end address")?,
        perms: perms.to_string(),
        offset: hex(offset, "offset")?,
        dev: dev.to_string(),
        inode,
        path: (!path.is_empty()).then(|| path.to_string()),
    })
}

/// Split off the next whitespace-delimited field.
fn take_field(text: &str) -> Option<(&str, &str)>
{
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    Some(text.split_at(end))
}
