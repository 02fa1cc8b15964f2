//! Tests for the cleanup stack and initializer scopes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vantage_core::cleanup::{CleanupKey, CleanupStack, InitScope};
use vantage_core::error::{VantageError, VantageResult};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, name: &'static str) -> impl FnOnce() -> VantageResult<()> + Send + 'static
{
    let log = Arc::clone(log);
    move || {
        log.lock().unwrap().push(name);
        Ok(())
    }
}

#[test]
fn test_drain_runs_newest_first_once()
{
    let log = Log::default();
    let mut stack = CleanupStack::new();
    for (arg, name) in [(1, "a"), (2, "b"), (3, "c")] {
        stack.push(CleanupKey::new("step", arg), record(&log, name)).unwrap();
    }

    assert_eq!(stack.drain(), 3);
    assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);

    assert_eq!(stack.drain(), 0);
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[test]
fn test_remove_takes_newest_matching_entry()
{
    let log = Log::default();
    let key = CleanupKey::new("mapping", 7);
    let mut stack = CleanupStack::new();
    stack.push(key.clone(), record(&log, "older")).unwrap();
    stack.push(key.clone(), record(&log, "newer")).unwrap();

    assert!(stack.remove(&key));
    assert_eq!(stack.drain(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["older"]);
}

#[test]
fn test_remove_until_empty()
{
    let key = CleanupKey::new("mapping", 7);
    let mut stack = CleanupStack::new();
    stack.push(key.clone(), || Ok(())).unwrap();
    stack.push(key.clone(), || Ok(())).unwrap();

    assert!(stack.remove(&key));
    assert!(stack.remove(&key));
    assert!(!stack.remove(&key));
    assert!(stack.is_empty());
}

#[test]
fn test_remove_matches_label_and_arg()
{
    let mut stack = CleanupStack::new();
    stack.push(CleanupKey::new("file", 1), || Ok(())).unwrap();

    assert!(!stack.remove(&CleanupKey::new("file", 2)));
    assert!(!stack.remove(&CleanupKey::new("mapping", 1)));
    assert_eq!(stack.len(), 1);
}

#[test]
fn test_failing_action_does_not_stop_drain()
{
    let log = Log::default();
    let mut stack = CleanupStack::new();
    stack.push(CleanupKey::new("a", 0), record(&log, "a")).unwrap();
    stack
        .push(CleanupKey::new("b", 0), || Err(VantageError::Lookup("gone".to_string())))
        .unwrap();

    assert_eq!(stack.drain(), 2);
    assert_eq!(*log.lock().unwrap(), vec!["a"]);
}

fn three_steps(log: &Log, fail_at: usize) -> VantageResult<CleanupStack>
{
    let mut scope = InitScope::new("three-steps");
    for (step, name) in [(1, "step 1"), (2, "step 2"), (3, "step 3")] {
        if step == fail_at {
            return Err(VantageError::MalformedInput(format!("{name} failed")));
        }
        scope.defer(CleanupKey::new(name, 0), record(log, name))?;
    }
    Ok(scope.commit())
}

#[test]
fn test_partial_failure_releases_only_completed_steps()
{
    let log = Log::default();
    let err = three_steps(&log, 2).unwrap_err();

    assert!(matches!(err, VantageError::MalformedInput(ref message) if message == "step 2 failed"));
    assert_eq!(*log.lock().unwrap(), vec!["step 1"]);
}

#[test]
fn test_committed_scope_hands_over_cleanups()
{
    let log = Log::default();
    let mut stack = three_steps(&log, 0).unwrap();
    assert!(log.lock().unwrap().is_empty());

    stack.drain();
    assert_eq!(*log.lock().unwrap(), vec!["step 3", "step 2", "step 1"]);
}

struct Probe(Arc<AtomicUsize>);

impl Drop for Probe
{
    fn drop(&mut self)
    {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_staged_value_released_on_unwind()
{
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let mut scope = InitScope::new("staged");
        let staged = scope.stage(CleanupKey::new("probe", 0), Probe(Arc::clone(&drops))).unwrap();
        assert_eq!(staged.with(|_| ()).ok(), Some(()));
        assert_eq!(scope.pending(), 1);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_claimed_value_outlives_scope()
{
    let drops = Arc::new(AtomicUsize::new(0));
    let probe = {
        let mut scope = InitScope::new("claimed");
        let staged = scope.stage(CleanupKey::new("probe", 0), Probe(Arc::clone(&drops))).unwrap();
        let probe = scope.claim(staged).unwrap();
        assert_eq!(scope.pending(), 0);
        probe
    };
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(probe);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
