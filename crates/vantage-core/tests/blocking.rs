//! Tests for the timeout-bounded initializers

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use vantage_core::blocking::{from_core_dump_with_timeout, from_pid_with_timeout, with_timeout};
use vantage_core::cleanup::CleanupKey;
use vantage_core::memory::MockSegment;
use vantage_core::{Program, VantageError};

fn mock() -> Program
{
    Program::from_mock(8, true, vec![MockSegment::from_bytes(0x1000, vec![7u8; 8])], vec![], vec![]).unwrap()
}

#[tokio::test]
async fn test_with_timeout_returns_program()
{
    let program = with_timeout(Duration::from_secs(10), || Ok(mock())).await.unwrap();
    assert_eq!(program.read_u8(0x1000).unwrap(), 7);
}

#[tokio::test]
async fn test_with_timeout_passes_errors_through()
{
    let err = with_timeout(Duration::from_secs(10), || Program::from_mock(3, true, vec![], vec![], vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, VantageError::UnsupportedTarget(_)));
}

#[tokio::test]
async fn test_late_program_is_torn_down()
{
    let (sender, receiver) = mpsc::channel();
    let err = with_timeout(Duration::from_millis(20), move || {
        thread::sleep(Duration::from_millis(300));
        let mut program = mock();
        program
            .add_cleanup(CleanupKey::new("late", 0), move || {
                let _ = sender.send(());
                Ok(())
            })
            .map_err(VantageError::from)?;
        Ok(program)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, VantageError::TimedOut(timeout) if timeout == Duration::from_millis(20)));
    let torn_down = tokio::task::spawn_blocking(move || receiver.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(torn_down.is_ok());
}

#[tokio::test]
async fn test_panicking_initializer()
{
    let err = with_timeout(Duration::from_secs(10), || panic!("initializer bug")).await.unwrap_err();
    assert!(matches!(err, VantageError::InconsistentState(_)));
}

#[tokio::test]
async fn test_missing_targets()
{
    let err = from_core_dump_with_timeout("/nonexistent/vmcore", false, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, VantageError::TargetNotFound(_)));

    let err = from_pid_with_timeout(u32::MAX, Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, VantageError::TargetNotFound(_)));
}
