//! Tests for error handling

use std::io;
use std::time::Duration;

use vantage_core::cleanup::{CleanupKey, CleanupStack};
use vantage_core::error::{VantageError, VantageResult};
use vantage_core::metadata::TargetKind;

#[test]
fn test_io_not_found_is_target_not_found()
{
    let error = VantageError::io("/var/crash/vmcore", io::Error::from(io::ErrorKind::NotFound));
    match error {
        VantageError::TargetNotFound(message) => assert!(message.contains("/var/crash/vmcore")),
        other => panic!("Expected TargetNotFound, got {other:?}"),
    }
}

#[test]
fn test_io_permission_denied()
{
    let error = VantageError::io("/proc/kcore", io::Error::from(io::ErrorKind::PermissionDenied));
    let message = format!("{}", error);
    assert!(message.contains("Permission denied"));
    assert!(message.contains("/proc/kcore"));
}

#[test]
fn test_io_esrch_is_target_not_found()
{
    let error = VantageError::io("/proc/1234/mem", io::Error::from_raw_os_error(libc::ESRCH));
    assert!(matches!(error, VantageError::TargetNotFound(_)));
}

#[test]
fn test_other_io_errors_keep_source()
{
    let error: VantageError = io::Error::new(io::ErrorKind::InvalidData, "bad block").into();
    match &error {
        VantageError::Io { source, .. } => assert_eq!(source.kind(), io::ErrorKind::InvalidData),
        other => panic!("Expected Io, got {other:?}"),
    }
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_fault_display()
{
    let error = VantageError::Fault {
        address: 0xffff_8880_0000_0000,
        size: 16,
    };
    let message = format!("{}", error);
    assert!(message.contains("16 bytes"));
    assert!(message.contains("0xffff888000000000"));
}

#[test]
fn test_variant_misuse_display()
{
    let error = VantageError::VariantMisuse {
        requested: "kernel_info",
        kind: TargetKind::Userspace,
    };
    let message = format!("{}", error);
    assert!(message.contains("kernel_info"));
    assert!(message.contains("userspace"));
}

#[test]
fn test_timed_out_display()
{
    let message = format!("{}", VantageError::TimedOut(Duration::from_secs(3)));
    assert!(message.contains("3s"));
}

#[test]
fn test_push_rejection_converts_to_error()
{
    let mut stack = CleanupStack::new();
    assert!(stack.push(CleanupKey::new("ok", 0), || Ok(())).is_ok());

    let mut program = vantage_core::Program::from_mock(8, true, vec![], vec![], vec![]).unwrap();
    program.deinitialize().unwrap();
    let rejected = program.add_cleanup(CleanupKey::new("late", 0), || Ok(())).unwrap_err();
    assert!(rejected.is_closed());
    assert_eq!(rejected.key().label(), "late");
    assert!(matches!(VantageError::from(rejected), VantageError::Deinitialized));
}

#[test]
fn test_result_type()
{
    // Test that Result type is properly aliased
    let _result: VantageResult<()> = Ok(());
    let _error_result: VantageResult<()> = Err(VantageError::Lookup("init_task".to_string()));
}
