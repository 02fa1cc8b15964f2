//! C-style escaping of target bytes for display.
//!
//! Release strings and mapping paths come straight out of target memory and
//! may hold anything; these helpers render them the way a C literal would.

use std::fmt::Write;

/// Which quote and backslash characters to escape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscapeOptions
{
    pub single_quote: bool,
    pub double_quote: bool,
    pub backslash: bool,
}

/// Escape one byte.
///
/// ```rust
/// use vantage_core::escape::{escape_character, EscapeOptions};
///
/// assert_eq!(escape_character(b'\n', EscapeOptions::default()), "\\n");
/// assert_eq!(escape_character(0x7f, EscapeOptions::default()), "\\x7f");
/// assert_eq!(escape_character(b'A', EscapeOptions::default()), "A");
/// ```
#[must_use]
pub fn escape_character(byte: u8, options: EscapeOptions) -> String
{
    let mut out = String::new();
    push_escaped(&mut out, byte, options);
    out
}

fn push_escaped(out: &mut String, byte: u8, options: EscapeOptions)
{
    match byte {
        0 => out.push_str("\\0"),
        7 => out.push_str("\\a"),
        8 => out.push_str("\\b"),
        b'\t' => out.push_str("\\t"),
        b'\n' => out.push_str("\\n"),
        11 => out.push_str("\\v"),
        12 => out.push_str("\\f"),
        b'\r' => out.push_str("\\r"),
        b'"' if options.double_quote => out.push_str("\\\""),
        b'\'' if options.single_quote => out.push_str("\\'"),
        b'\\' if options.backslash => out.push_str("\\\\"),
        b' '..=b'~' => out.push(char::from(byte)),
        _ => {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
}

/// Escape every byte of `bytes`.
#[must_use]
pub fn escape_string(bytes: &[u8], options: EscapeOptions) -> String
{
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        push_escaped(&mut out, byte, options);
    }
    out
}

/// Render `bytes` as a double-quoted C string literal.
///
/// ```rust
/// use vantage_core::escape::c_string;
///
/// assert_eq!(c_string(b"say \"hi\"\\\n"), r#""say \"hi\"\\\n""#);
/// ```
#[must_use]
pub fn c_string(bytes: &[u8]) -> String
{
    let options = EscapeOptions {
        single_quote: false,
        double_quote: true,
        backslash: true,
    };
    format!("\"{}\"", escape_string(bytes, options))
}
