//! # Cleanup Stack
//!
//! Ordered teardown actions for a program and for the initializers that build
//! one.
//!
//! Each backend initializer acquires its resources in a fixed sequence and
//! registers one cleanup per successful step. If a later step fails, the
//! registered cleanups run newest-first, so dependents are torn down before the
//! things they depend on. A finished program keeps its stack and drains it on
//! teardown.
//!
//! ## Pieces
//!
//! - [`CleanupStack`]: the ordered list itself (push, remove, drain)
//! - [`InitScope`]: a guard that owns a stack while an initializer runs and
//!   drains it on any early return
//! - [`Staged`]: a value held by an `InitScope` until a later step claims it
//!
//! ## Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use vantage_core::cleanup::{CleanupKey, CleanupStack};
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let mut stack = CleanupStack::new();
//! for name in ["a", "b", "c"] {
//!     let order = Arc::clone(&order);
//!     stack
//!         .push(CleanupKey::new(name, 0), move || {
//!             order.lock().unwrap().push(name);
//!             Ok(())
//!         })
//!         .map_err(|_| "allocation failure")?;
//! }
//! stack.drain();
//! assert_eq!(*order.lock().unwrap(), ["c", "b", "a"]);
//! # Ok::<(), &'static str>(())
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::error::{VantageError, VantageResult};

/// Identity of a cleanup entry.
///
/// A key pairs a label naming the kind of teardown with a numeric argument that
/// tells instances apart (a file descriptor, an index, an address). Removal
/// matches both parts exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CleanupKey
{
    label: Cow<'static, str>,
    arg: u64,
}

impl CleanupKey
{
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>, arg: u64) -> Self
    {
        Self {
            label: label.into(),
            arg,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str
    {
        &self.label
    }

    #[must_use]
    pub fn arg(&self) -> u64
    {
        self.arg
    }
}

impl fmt::Display for CleanupKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}({:#x})", self.label, self.arg)
    }
}

type CleanupAction = Box<dyn FnOnce() -> VantageResult<()> + Send>;

struct CleanupEntry
{
    key: CleanupKey,
    action: CleanupAction,
}

/// A cleanup that could not be registered.
///
/// Returned by [`CleanupStack::push`] when the stack cannot grow, and by
/// [`Program::add_cleanup`](crate::Program::add_cleanup) once the program has
/// been deinitialized. Nothing was registered; the action is handed back so
/// the caller can undo its own step right away.
pub struct PushRejected<F>
{
    key: CleanupKey,
    action: F,
    closed: bool,
}

impl<F> PushRejected<F>
{
    pub(crate) fn closed(key: CleanupKey, action: F) -> Self
    {
        Self {
            key,
            action,
            closed: true,
        }
    }

    /// Whether the owner had already been torn down, as opposed to running out
    /// of memory.
    #[must_use]
    pub fn is_closed(&self) -> bool
    {
        self.closed
    }
}

impl<F> PushRejected<F>
where
    F: FnOnce() -> VantageResult<()>,
{
    /// Key of the entry that was not registered.
    pub fn key(&self) -> &CleanupKey
    {
        &self.key
    }

    /// Take back the action without running it.
    pub fn into_action(self) -> F
    {
        self.action
    }

    /// Run the rejected action now.
    pub fn run(self) -> VantageResult<()>
    {
        (self.action)()
    }
}

impl<F> fmt::Debug for PushRejected<F>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("PushRejected")
            .field("key", &self.key)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<F> From<PushRejected<F>> for VantageError
{
    fn from(rejected: PushRejected<F>) -> Self
    {
        if rejected.closed {
            VantageError::Deinitialized
        } else {
            VantageError::AllocationFailure
        }
    }
}

/// Pending teardown actions, run newest-first.
///
/// The stack is not re-entrant: [`CleanupStack::drain`] moves every entry out
/// before running any of them, so an action cannot observe or modify the stack
/// it came from.
#[derive(Default)]
pub struct CleanupStack
{
    entries: Vec<CleanupEntry>,
}

impl CleanupStack
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register `action` to run when the stack is drained.
    ///
    /// ## Errors
    ///
    /// Fails only if the stack cannot reserve room for the entry. The stack is
    /// left untouched and the action comes back inside [`PushRejected`].
    pub fn push<F>(&mut self, key: CleanupKey, action: F) -> Result<(), PushRejected<F>>
    where
        F: FnOnce() -> VantageResult<()> + Send + 'static,
    {
        if self.entries.try_reserve(1).is_err() {
            return Err(PushRejected {
                key,
                action,
                closed: false,
            });
        }
        trace!(%key, depth = self.entries.len() + 1, "registered cleanup");
        self.entries.push(CleanupEntry {
            key,
            action: Box::new(action),
        });
        Ok(())
    }

    /// Remove the most recently pushed entry whose key equals `key`.
    ///
    /// The removed action is dropped without running. Returns `false` if no
    /// entry matched.
    pub fn remove(&mut self, key: &CleanupKey) -> bool
    {
        match self.entries.iter().rposition(|entry| entry.key == *key) {
            Some(index) => {
                self.entries.remove(index);
                trace!(%key, "removed cleanup");
                true
            }
            None => false,
        }
    }

    /// Run every remaining entry, newest first, and leave the stack empty.
    ///
    /// A failing action is logged and the drain continues with the next entry.
    /// Returns the number of actions that ran. Draining an empty stack does
    /// nothing.
    pub fn drain(&mut self) -> usize
    {
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();
        for entry in entries.into_iter().rev() {
            trace!(key = %entry.key, "running cleanup");
            if let Err(err) = (entry.action)() {
                warn!(key = %entry.key, error = %err, "cleanup failed");
            }
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Keys of the pending entries, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &CleanupKey>
    {
        self.entries.iter().map(|entry| &entry.key)
    }
}

impl fmt::Debug for CleanupStack
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_list().entries(self.keys()).finish()
    }
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T>
{
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A value acquired by an initializer step and held by an [`InitScope`].
///
/// Until it is claimed, the scope owns the value's release: if the initializer
/// bails out, the value is dropped when the scope unwinds, in reverse
/// acquisition order with everything else the scope holds.
pub struct Staged<T>
{
    key: CleanupKey,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Staged<T>
{
    /// Run `f` with a reference to the held value.
    ///
    /// ## Errors
    ///
    /// - `InconsistentState`: the value was already released
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> VantageResult<R>
    {
        let guard = lock(&self.slot);
        let value = guard
            .as_ref()
            .ok_or_else(|| VantageError::InconsistentState(format!("{} was already released", self.key)))?;
        Ok(f(value))
    }

    #[must_use]
    pub fn key(&self) -> &CleanupKey
    {
        &self.key
    }
}

/// Scope guard for a multi-step initializer.
///
/// Steps register cleanups with [`InitScope::defer`] or hand over values with
/// [`InitScope::stage`]. Dropping the scope without calling
/// [`InitScope::commit`] drains everything registered so far, newest first.
///
/// ```rust
/// use vantage_core::cleanup::{CleanupKey, InitScope};
/// use vantage_core::error::{VantageError, VantageResult};
///
/// fn open_both() -> VantageResult<(Vec<u8>, Vec<u8>)>
/// {
///     let mut scope = InitScope::new("example");
///     let first = scope.stage(CleanupKey::new("first", 0), vec![1u8])?;
///     let second: VantageResult<Vec<u8>> = Err(VantageError::TargetNotFound("second".into()));
///     let second = second?; // `first` is released here
///     let first = scope.claim(first)?;
///     scope.commit();
///     Ok((first, second))
/// }
///
/// assert!(open_both().is_err());
/// ```
pub struct InitScope
{
    name: &'static str,
    stack: CleanupStack,
}

impl InitScope
{
    /// Start a scope for the initializer called `name` (used in log output).
    #[must_use]
    pub fn new(name: &'static str) -> Self
    {
        Self {
            name,
            stack: CleanupStack::new(),
        }
    }

    /// Register the cleanup for a step that just succeeded.
    ///
    /// ## Errors
    ///
    /// - `AllocationFailure`: the entry could not be registered. The action is
    ///   run immediately to undo the step before the error is returned.
    pub fn defer<F>(&mut self, key: CleanupKey, action: F) -> VantageResult<()>
    where
        F: FnOnce() -> VantageResult<()> + Send + 'static,
    {
        self.stack.push(key, action).map_err(|rejected| {
            let key = rejected.key().clone();
            if let Err(err) = rejected.run() {
                warn!(scope = self.name, %key, error = %err, "compensating cleanup failed");
            }
            VantageError::AllocationFailure
        })
    }

    /// Cancel the most recent pending cleanup registered under `key`.
    pub fn cancel(&mut self, key: &CleanupKey) -> bool
    {
        self.stack.remove(key)
    }

    /// Hand `value` to the scope; it is released on unwind unless claimed.
    ///
    /// ## Errors
    ///
    /// - `AllocationFailure`: the release could not be registered; `value` has
    ///   already been dropped
    pub fn stage<T>(&mut self, key: CleanupKey, value: T) -> VantageResult<Staged<T>>
    where
        T: Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(value)));
        let held = Arc::clone(&slot);
        let label = key.clone();
        self.defer(key.clone(), move || {
            if lock(&held).take().is_some() {
                trace!(key = %label, "released staged value");
            }
            Ok(())
        })?;
        Ok(Staged { key, slot })
    }

    /// Take a staged value back out of the scope.
    ///
    /// Its pending release is cancelled, so the caller now owns the value.
    ///
    /// ## Errors
    ///
    /// - `InconsistentState`: the value was already released
    pub fn claim<T>(&mut self, staged: Staged<T>) -> VantageResult<T>
    {
        self.stack.remove(&staged.key);
        let value = lock(&staged.slot).take();
        value.ok_or_else(|| VantageError::InconsistentState(format!("{} was already released", staged.key)))
    }

    /// Finish the initializer successfully.
    ///
    /// Returns the cleanups that are still pending, for the new owner to drain
    /// at its own teardown.
    pub fn commit(mut self) -> CleanupStack
    {
        std::mem::take(&mut self.stack)
    }

    /// Number of pending cleanups.
    #[must_use]
    pub fn pending(&self) -> usize
    {
        self.stack.len()
    }
}

impl Drop for InitScope
{
    fn drop(&mut self)
    {
        if !self.stack.is_empty() {
            debug!(scope = self.name, pending = self.stack.len(), "unwinding failed initialization");
            self.stack.drain();
        }
    }
}
