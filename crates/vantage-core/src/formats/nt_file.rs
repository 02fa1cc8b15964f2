//! The `NT_FILE` note: which files a crashed process had mapped.
//!
//! Layout, in target words of the core's byte order:
//!
//! ```text
//! count
//! page_size
//! count x (start, end, page_offset)
//! count x NUL-terminated path
//! ```

use crate::error::{VantageError, VantageResult};
use crate::types::Platform;

/// `n_type` of the note (`'FILE'`).
pub const NT_FILE: u32 = 0x4649_4c45;

/// Note name used for `NT_FILE`.
pub const NOTE_NAME: &[u8] = b"CORE";

/// One entry of an `NT_FILE` note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtFileEntry
{
    pub start: u64,
    pub end: u64,
    /// Byte offset in the file (page offset times page size).
    pub file_offset: u64,
    pub path: String,
}

/// Parse an `NT_FILE` note descriptor.
///
/// ## Errors
///
/// - `MalformedInput`: the descriptor is truncated or the counts do not add up
pub fn parse_nt_file(desc: &[u8], platform: Platform) -> VantageResult<Vec<NtFileEntry>>
{
    let word = usize::from(platform.word_size().bytes());
    let truncated = || VantageError::MalformedInput(format!("NT_FILE note is truncated ({} bytes)", desc.len()));
    let read_word = |index: usize| -> VantageResult<u64> {
        let start = index.checked_mul(word).ok_or_else(truncated)?;
        start
            .checked_add(word)
            .and_then(|end| desc.get(start..end))
            .and_then(|bytes| platform.decode_word(bytes))
            .ok_or_else(truncated)
    };

    let count = usize::try_from(read_word(0)?).map_err(|_| truncated())?;
    let page_size = read_word(1)?;
    let table_words = count.checked_mul(3).and_then(|words| words.checked_add(2)).ok_or_else(truncated)?;
    let names_start = table_words.checked_mul(word).ok_or_else(truncated)?;
    if names_start > desc.len() {
        return Err(truncated());
    }

    let mut names = &desc[names_start..];
    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let start = read_word(2 + index * 3)?;
        let end = read_word(3 + index * 3)?;
        let page_offset = read_word(4 + index * 3)?;
        let nul = names
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| VantageError::MalformedInput(format!("NT_FILE note has {count} ranges but fewer names")))?;
        let name = &names[..nul];
        names = &names[nul + 1..];
        let file_offset = page_offset.checked_mul(page_size).ok_or_else(|| {
            VantageError::MalformedInput(format!("NT_FILE page offset 0x{page_offset:x} overflows"))
        })?;
        entries.push(NtFileEntry {
            start,
            end,
            file_offset,
            path: String::from_utf8_lossy(name).into_owned(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::WordSize;

    fn note(words: &[u64], names: &[&str], platform: Platform) -> Vec<u8>
    {
        let mut desc = Vec::new();
        for &value in words {
            match (platform.word_size(), platform.is_little_endian()) {
                (WordSize::Eight, true) => desc.extend_from_slice(&value.to_le_bytes()),
                (WordSize::Eight, false) => desc.extend_from_slice(&value.to_be_bytes()),
                (WordSize::Four, true) => desc.extend_from_slice(&(value as u32).to_le_bytes()),
                (WordSize::Four, false) => desc.extend_from_slice(&(value as u32).to_be_bytes()),
            }
        }
        for name in names {
            desc.extend_from_slice(name.as_bytes());
            desc.push(0);
        }
        desc
    }

    #[test]
    fn test_parse_two_entries()
    {
        let platform = Platform::new(WordSize::Eight, true);
        let desc = note(
            &[2, 0x1000, 0x40_0000, 0x40_1000, 0, 0x7f00_0000_0000, 0x7f00_0000_2000, 3],
            &["/usr/bin/cat", "/usr/lib/libc.so.6"],
            platform,
        );
        let entries = parse_nt_file(&desc, platform).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/usr/bin/cat");
        assert_eq!(entries[1].start, 0x7f00_0000_0000);
        assert_eq!(entries[1].file_offset, 0x3000);
    }

    #[test]
    fn test_parse_big_endian_32_bit()
    {
        let platform = Platform::new(WordSize::Four, false);
        let desc = note(&[1, 0x1000, 0x1_0000, 0x1_1000, 2], &["/bin/sh"], platform);
        let entries = parse_nt_file(&desc, platform).unwrap();
        assert_eq!(entries[0].start, 0x1_0000);
        assert_eq!(entries[0].file_offset, 0x2000);
    }

    #[test]
    fn test_truncated_note()
    {
        let platform = Platform::new(WordSize::Eight, true);
        let desc = note(&[3, 0x1000, 0x40_0000], &[], platform);
        assert!(matches!(parse_nt_file(&desc, platform), Err(VantageError::MalformedInput(_))));

        let missing_name = note(&[1, 0x1000, 0x40_0000, 0x40_1000, 0], &[], platform);
        assert!(matches!(parse_nt_file(&missing_name, platform), Err(VantageError::MalformedInput(_))));
    }
}
