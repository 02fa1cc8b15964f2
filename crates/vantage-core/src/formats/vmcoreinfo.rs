//! VMCOREINFO: `KEY=value` lines the kernel exports for crash tools.
//!
//! Only two keys matter here. `OSRELEASE` is required; `KERNELOFFSET` is the
//! KASLR offset in hex and is absent on kernels without KASLR.

use crate::error::{VantageError, VantageResult};
use crate::metadata::KernelInfo;

/// Note name used for VMCOREINFO in vmcores and `/proc/kcore`.
pub const NOTE_NAME: &[u8] = b"VMCOREINFO";

/// Parse a VMCOREINFO payload.
///
/// ## Errors
///
/// - `MalformedInput`: `OSRELEASE` is missing or unusable, or `KERNELOFFSET`
///   is not hex
pub fn parse_vmcoreinfo(desc: &[u8]) -> VantageResult<KernelInfo>
{
    let end = desc.iter().rposition(|&byte| byte != 0).map_or(0, |last| last + 1);
    let text = String::from_utf8_lossy(&desc[..end]);

    let mut os_release = None;
    let mut kaslr_offset = 0;
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "OSRELEASE" => os_release = Some(value.to_string()),
            "KERNELOFFSET" => {
                kaslr_offset = u64::from_str_radix(value.trim(), 16)
                    .map_err(|err| VantageError::malformed(&format!("VMCOREINFO KERNELOFFSET={value}"), err))?;
            }
            _ => {}
        }
    }

    let os_release =
        os_release.ok_or_else(|| VantageError::MalformedInput("VMCOREINFO does not contain OSRELEASE".to_string()))?;
    KernelInfo::new(os_release, kaslr_offset)
}

/// Parse the contents of `/sys/kernel/vmcoreinfo`: `<physical address> <size>`
/// in hex.
///
/// ## Errors
///
/// - `MalformedInput`: the contents are not two hex numbers
pub fn parse_sysfs_location(text: &str) -> VantageResult<(u64, u64)>
{
    let mut fields = text.split_whitespace();
    let mut next_hex = |what: &str| -> VantageResult<u64> {
        let field = fields
            .next()
            .ok_or_else(|| VantageError::MalformedInput(format!("/sys/kernel/vmcoreinfo is missing the {what}")))?;
        u64::from_str_radix(field.trim_start_matches("0x"), 16)
            .map_err(|err| VantageError::malformed(&format!("/sys/kernel/vmcoreinfo {what} {field}"), err))
    };
    let address = next_hex("address")?;
    let size = next_hex("size")?;
    Ok((address, size))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_release_and_offset()
    {
        let desc = b"OSRELEASE=6.8.0-31-generic\nPAGESIZE=4096\nKERNELOFFSET=1a000000\n\0\0\0";
        let info = parse_vmcoreinfo(desc).unwrap();
        assert_eq!(info.os_release(), "6.8.0-31-generic");
        assert_eq!(info.kaslr_offset(), 0x1a00_0000);
    }

    #[test]
    fn test_missing_offset_defaults_to_zero()
    {
        let info = parse_vmcoreinfo(b"OSRELEASE=4.19.0\n").unwrap();
        assert_eq!(info.kaslr_offset(), 0);
    }

    #[test]
    fn test_missing_release_is_malformed()
    {
        assert!(matches!(parse_vmcoreinfo(b"PAGESIZE=4096\n"), Err(VantageError::MalformedInput(_))));
        assert!(matches!(
            parse_vmcoreinfo(b"OSRELEASE=6.1\nKERNELOFFSET=zz\n"),
            Err(VantageError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_sysfs_location()
    {
        assert_eq!(parse_sysfs_location("1c8b0c0 1024\n").unwrap(), (0x1c8_b0c0, 0x1024));
        assert!(parse_sysfs_location("1c8b0c0").is_err());
    }
}
