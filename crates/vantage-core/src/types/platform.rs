//! Word size and byte order of a debugging target.

use std::fmt;

use gimli::RunTimeEndian;

use crate::error::{VantageError, VantageResult};

/// Native integer/pointer width of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordSize
{
    /// 32-bit target
    Four,
    /// 64-bit target
    Eight,
}

impl WordSize
{
    /// Width in bytes (4 or 8).
    #[must_use]
    pub const fn bytes(self) -> u8
    {
        match self {
            WordSize::Four => 4,
            WordSize::Eight => 8,
        }
    }

    /// Maximum word value, `2^(8 * bytes) - 1`.
    ///
    /// ```rust
    /// use vantage_core::types::WordSize;
    ///
    /// assert_eq!(WordSize::Four.mask(), 0xffff_ffff);
    /// assert_eq!(WordSize::Eight.mask(), u64::MAX);
    /// ```
    #[must_use]
    pub const fn mask(self) -> u64
    {
        match self {
            WordSize::Four => u32::MAX as u64,
            WordSize::Eight => u64::MAX,
        }
    }
}

impl TryFrom<u8> for WordSize
{
    type Error = VantageError;

    fn try_from(bytes: u8) -> VantageResult<Self>
    {
        match bytes {
            4 => Ok(WordSize::Four),
            8 => Ok(WordSize::Eight),
            other => Err(VantageError::UnsupportedTarget(format!("word size {other} (expected 4 or 8)"))),
        }
    }
}

impl fmt::Display for WordSize
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}-bit", u32::from(self.bytes()) * 8)
    }
}

/// Word size and byte order, fixed once a program is initialized.
///
/// Every subsystem owned by a program reports the `Platform` it was built for;
/// the program rejects any subsystem whose platform differs from its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform
{
    word_size: WordSize,
    little_endian: bool,
}

impl Platform
{
    /// Create a platform description.
    #[must_use]
    pub const fn new(word_size: WordSize, little_endian: bool) -> Self
    {
        Self {
            word_size,
            little_endian,
        }
    }

    /// The platform of the machine this crate was compiled for.
    #[must_use]
    pub fn host() -> Self
    {
        let word_size = if cfg!(target_pointer_width = "64") {
            WordSize::Eight
        } else {
            WordSize::Four
        };
        Self::new(word_size, cfg!(target_endian = "little"))
    }

    #[must_use]
    pub const fn word_size(self) -> WordSize
    {
        self.word_size
    }

    #[must_use]
    pub const fn is_little_endian(self) -> bool
    {
        self.little_endian
    }

    /// Byte order in the form gimli expects.
    #[must_use]
    pub const fn endian(self) -> RunTimeEndian
    {
        if self.little_endian {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        }
    }

    /// Decode an unsigned integer of 1 to 8 bytes in this platform's byte order.
    #[must_use]
    pub fn decode_uint(self, bytes: &[u8]) -> u64
    {
        debug_assert!(bytes.len() <= 8);
        let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
        if self.little_endian {
            bytes.iter().rev().fold(0, fold)
        } else {
            bytes.iter().fold(0, fold)
        }
    }

    /// Decode one target word from the front of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than a word.
    #[must_use]
    pub fn decode_word(self, bytes: &[u8]) -> Option<u64>
    {
        let width = usize::from(self.word_size.bytes());
        bytes.get(..width).map(|word| self.decode_uint(word))
    }

    /// Fail with [`VantageError::InconsistentState`] unless `other` matches.
    ///
    /// `what` names the subsystem being checked, for the error message.
    pub fn ensure_matches(self, other: Platform, what: &str) -> VantageResult<()>
    {
        if self == other {
            Ok(())
        } else {
            Err(VantageError::InconsistentState(format!(
                "{what} is {other} but the program is {self}"
            )))
        }
    }
}

impl fmt::Display for Platform
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let order = if self.little_endian { "little-endian" } else { "big-endian" };
        write!(f, "{} {}", self.word_size, order)
    }
}
