//! Write-once result cell shared between submitter and executor
//!
//! A [`Future`] is created Pending when work is accepted, moves to Running
//! when an executor picks the work up, and transitions exactly once into one
//! of three terminal states: Completed, Failed, or Cancelled. The submitter
//! reads the cell; the executing component writes it exactly once. No third
//! party mutates it.

use crate::error::{InvalidState, TaskError, WaitError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unique identifier for a Future
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FutureId(u64);

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

impl FutureId {
    /// Generate a new unique FutureId
    pub fn new() -> Self {
        FutureId(NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for FutureId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a Future
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FutureState {
    /// Work accepted, not yet started
    Pending,
    /// An executor is running the work
    Running,
    /// Terminal: finished with a value
    Completed,
    /// Terminal: finished with an error
    Failed,
    /// Terminal: cancelled before producing a result
    Cancelled,
}

impl FutureState {
    /// True iff the state never changes again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FutureState::Completed | FutureState::Failed | FutureState::Cancelled
        )
    }
}

/// Cooperative cancellation flag handed to running work
///
/// Cancellation is a signal the unit of work may honor or ignore, never a
/// forced interrupt. A job that wants to be cancellable polls the token and
/// returns [`TaskError::Cancelled`] when it observes the flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// True once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

type Callback<T> = Box<dyn FnOnce(&Future<T>) + Send>;

/// Everything guarded by the cell mutex. A reader sees either a fully
/// pending or a fully terminal cell, never a partial write.
struct Cell<T> {
    state: FutureState,
    value: Option<T>,
    error: Option<TaskError>,
    callbacks: Vec<Callback<T>>,
}

struct FutureInner<T> {
    id: FutureId,
    cell: Mutex<Cell<T>>,
    done: Condvar,
    cancel_requested: Arc<AtomicBool>,
}

/// Cloneable handle to the shared write-once cell
pub struct Future<T> {
    inner: Arc<FutureInner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Future<T> {
    /// Create a new Future in the Pending state
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                id: FutureId::new(),
                cell: Mutex::new(Cell {
                    state: FutureState::Pending,
                    value: None,
                    error: None,
                    callbacks: Vec::new(),
                }),
                done: Condvar::new(),
                cancel_requested: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Get the future's unique ID
    pub fn id(&self) -> FutureId {
        self.inner.id
    }

    /// Get the current state
    pub fn state(&self) -> FutureState {
        self.inner.cell.lock().state
    }

    /// Non-blocking; true iff the state is terminal
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Get a cooperative cancellation token for the underlying work
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::clone(&self.inner.cancel_requested),
        }
    }

    /// True once `cancel` has been called, regardless of whether it succeeded
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Transition into Completed with a value
    ///
    /// Fails with [`InvalidState`] when the future is already terminal.
    /// Registered callbacks fire synchronously, in registration order, each
    /// receiving the terminal future.
    pub fn complete(&self, value: T) -> Result<(), InvalidState> {
        self.finish(Ok(value))
    }

    /// Transition into Failed (or Cancelled for [`TaskError::Cancelled`])
    ///
    /// Symmetric to [`complete`](Self::complete).
    pub fn fail(&self, error: TaskError) -> Result<(), InvalidState> {
        self.finish(Err(error))
    }

    fn finish(&self, outcome: Result<T, TaskError>) -> Result<(), InvalidState> {
        let callbacks = {
            let mut cell = self.inner.cell.lock();
            if cell.state.is_terminal() {
                return Err(InvalidState(cell.state));
            }
            match outcome {
                Ok(value) => {
                    cell.state = FutureState::Completed;
                    cell.value = Some(value);
                }
                Err(TaskError::Cancelled) => {
                    cell.state = FutureState::Cancelled;
                    cell.error = Some(TaskError::Cancelled);
                }
                Err(error) => {
                    cell.state = FutureState::Failed;
                    cell.error = Some(error);
                }
            }
            self.inner.done.notify_all();
            std::mem::take(&mut cell.callbacks)
        };
        // Callbacks run outside the lock so they may inspect the future.
        for callback in callbacks {
            callback(self);
        }
        Ok(())
    }

    /// Transition Pending -> Running when an executor picks the work up
    ///
    /// Returns false when the future is already terminal (e.g. cancelled
    /// while still queued); the work must not run in that case.
    pub(crate) fn mark_running(&self) -> bool {
        let mut cell = self.inner.cell.lock();
        if cell.state == FutureState::Pending {
            cell.state = FutureState::Running;
            true
        } else {
            false
        }
    }

    /// Request cooperative cancellation
    ///
    /// A Pending future transitions to Cancelled and `true` is returned: the
    /// work will never run. A Running future only has its cancellation flag
    /// set and `false` is returned; the work may honor the signal later, but
    /// there is no forced-termination path. Terminal futures return `false`.
    pub fn cancel(&self) -> bool {
        let callbacks = {
            let mut cell = self.inner.cell.lock();
            self.inner.cancel_requested.store(true, Ordering::Release);
            if cell.state != FutureState::Pending {
                return false;
            }
            cell.state = FutureState::Cancelled;
            cell.error = Some(TaskError::Cancelled);
            self.inner.done.notify_all();
            std::mem::take(&mut cell.callbacks)
        };
        for callback in callbacks {
            callback(self);
        }
        true
    }

    /// Register a callback invoked once after the transition to a terminal
    /// state. If the future is already terminal the callback fires inline,
    /// immediately.
    pub fn on_done(&self, callback: impl FnOnce(&Future<T>) + Send + 'static) {
        {
            let mut cell = self.inner.cell.lock();
            if !cell.state.is_terminal() {
                cell.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback(self);
    }

    /// Non-blocking peek at the stored error
    pub fn error(&self) -> Option<TaskError> {
        self.inner.cell.lock().error.clone()
    }
}

impl<T: Clone> Future<T> {
    /// Non-blocking peek at the stored value
    pub fn value(&self) -> Option<T> {
        self.inner.cell.lock().value.clone()
    }

    /// Block the calling thread until the future is terminal
    ///
    /// Returns the value or re-raises the stored error. Never call this from
    /// inside a cooperative task body: it blocks the loop thread and starves
    /// every other task. Use [`Awaited`](crate::coop::Awaited) there instead.
    pub fn wait(&self) -> Result<T, TaskError> {
        let mut cell = self.inner.cell.lock();
        while !cell.state.is_terminal() {
            self.inner.done.wait(&mut cell);
        }
        Self::outcome(&cell)
    }

    /// As [`wait`](Self::wait), with a deadline
    ///
    /// Fails with [`WaitError::Timeout`] when the deadline elapses first.
    /// The timeout detaches the waiter only; the underlying work keeps
    /// running unless explicitly cancelled.
    pub fn result(&self, timeout: Duration) -> Result<T, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.inner.cell.lock();
        while !cell.state.is_terminal() {
            let timed_out = self.inner.done.wait_until(&mut cell, deadline).timed_out();
            if timed_out && !cell.state.is_terminal() {
                return Err(WaitError::Timeout);
            }
        }
        Self::outcome(&cell).map_err(WaitError::Task)
    }

    fn outcome(cell: &Cell<T>) -> Result<T, TaskError> {
        match cell.state {
            FutureState::Completed => {
                Ok(cell.value.clone().expect("completed future holds a value"))
            }
            _ => Err(cell.error.clone().expect("failed future holds an error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_future_starts_pending() {
        let fut: Future<i32> = Future::pending();
        assert_eq!(fut.state(), FutureState::Pending);
        assert!(!fut.is_done());
        assert!(fut.value().is_none());
        assert!(fut.error().is_none());
    }

    #[test]
    fn test_future_ids_are_unique() {
        let a: Future<()> = Future::pending();
        let b: Future<()> = Future::pending();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_complete_is_write_once() {
        let fut = Future::pending();
        fut.complete(42).unwrap();
        assert_eq!(fut.state(), FutureState::Completed);
        assert_eq!(fut.value(), Some(42));

        // Second terminal transition must be rejected
        assert_eq!(
            fut.complete(43),
            Err(InvalidState(FutureState::Completed))
        );
        assert_eq!(
            fut.fail(TaskError::msg("late")),
            Err(InvalidState(FutureState::Completed))
        );
        assert_eq!(fut.value(), Some(42));
    }

    #[test]
    fn test_fail_stores_error_exclusively() {
        let fut: Future<i32> = Future::pending();
        fut.fail(TaskError::msg("boom")).unwrap();
        assert_eq!(fut.state(), FutureState::Failed);
        assert!(fut.value().is_none());
        assert!(matches!(fut.error(), Some(TaskError::Failed(_))));
    }

    #[test]
    fn test_fail_with_cancelled_maps_to_cancelled_state() {
        let fut: Future<i32> = Future::pending();
        fut.fail(TaskError::Cancelled).unwrap();
        assert_eq!(fut.state(), FutureState::Cancelled);
    }

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        let fut = Future::pending();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            fut.on_done(move |f| {
                assert!(f.is_done());
                order.lock().push(i);
            });
        }
        fut.complete("done").unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_on_done_after_terminal_fires_inline() {
        let fut = Future::pending();
        fut.complete(1).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        fut.on_done(move |f| {
            assert_eq!(f.value(), Some(1));
            fired2.store(true, Ordering::Release);
        });
        // Inline, not deferred
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn test_cancel_pending_succeeds() {
        let fut: Future<i32> = Future::pending();
        assert!(fut.cancel());
        assert_eq!(fut.state(), FutureState::Cancelled);
        assert!(matches!(fut.error(), Some(TaskError::Cancelled)));
        // Cancelling twice is a no-op
        assert!(!fut.cancel());
    }

    #[test]
    fn test_cancel_running_only_sets_flag() {
        let fut: Future<i32> = Future::pending();
        assert!(fut.mark_running());
        let token = fut.cancel_token();
        assert!(!token.is_cancelled());

        assert!(!fut.cancel());
        assert_eq!(fut.state(), FutureState::Running);
        assert!(token.is_cancelled());

        // The running work may still finish normally (signal not honored)
        fut.complete(7).unwrap();
        assert_eq!(fut.state(), FutureState::Completed);
    }

    #[test]
    fn test_mark_running_refuses_terminal() {
        let fut: Future<i32> = Future::pending();
        fut.cancel();
        assert!(!fut.mark_running());
    }

    #[test]
    fn test_result_timeout() {
        let fut: Future<i32> = Future::pending();
        let err = fut.result(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, WaitError::Timeout));

        // Still resolvable after the waiter gave up
        fut.complete(5).unwrap();
        assert_eq!(fut.result(Duration::from_millis(20)).unwrap(), 5);
    }

    #[test]
    fn test_wait_across_threads() {
        let fut = Future::pending();
        let writer = fut.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.complete(99).unwrap();
        });
        assert_eq!(fut.wait().unwrap(), 99);
        handle.join().unwrap();
    }

    #[test]
    fn test_callbacks_run_once_across_many_registrations() {
        let fut = Future::pending();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            fut.on_done(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        fut.complete(()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
