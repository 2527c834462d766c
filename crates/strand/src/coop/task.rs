//! Task cells, waker plumbing, and await adapters for the cooperative loop
//!
//! A cooperative task pairs a resumable body (a `std::future::Future` polled
//! by the scheduler) with a [`TaskCell`] the waker machinery targets and a
//! [`Future`](crate::future::Future) cell holding the eventual outcome. The
//! body lives in the scheduler's task table; the cell is the only part shared
//! with wakers, so it stays `Send + Sync` while bodies never leave the loop
//! thread.

use crate::error::TaskError;
use crate::future::Future;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::time::Instant;

/// Unique identifier for a cooperative Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a cooperative Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Just created, not yet queued
    Created,
    /// Queued for a future loop iteration
    Scheduled,
    /// The loop is polling the body right now
    Running,
    /// Parked at a suspension point, waiting to be woken
    Suspended,
    /// Terminal: body returned a value
    Completed,
    /// Terminal: body returned an error
    Failed,
    /// Terminal: cancellation was honored
    Cancelled,
}

impl TaskState {
    /// True iff the state never changes again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// FIFO queue of tasks ready to be polled
///
/// Thread-safe because wakes may arrive from outside the loop thread (e.g. a
/// worker-pool future completing while a cooperative task awaits it). The
/// condvar lets the parked loop sleep until the next wake or timer deadline.
pub(crate) struct ReadyQueue {
    queue: Mutex<VecDeque<TaskId>>,
    wakeup: Condvar,
}

impl ReadyQueue {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
        })
    }

    pub(crate) fn push(&self, id: TaskId) {
        self.queue.lock().push_back(id);
        self.wakeup.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<TaskId> {
        self.queue.lock().pop_front()
    }

    /// Park the loop thread until a wake arrives or the deadline passes
    pub(crate) fn park_until(&self, deadline: Option<Instant>) {
        let mut queue = self.queue.lock();
        if !queue.is_empty() {
            return;
        }
        match deadline {
            Some(at) => {
                let _ = self.wakeup.wait_until(&mut queue, at);
            }
            None => self.wakeup.wait(&mut queue),
        }
    }
}

/// The waker-visible half of a cooperative task
pub(crate) struct TaskCell {
    id: TaskId,
    state: Mutex<TaskState>,
    cancel_requested: AtomicBool,
    cancel_delivered: AtomicBool,
    queued: AtomicBool,
    ready: Arc<ReadyQueue>,
}

impl TaskCell {
    pub(crate) fn new(ready: Arc<ReadyQueue>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            state: Mutex::new(TaskState::Created),
            cancel_requested: AtomicBool::new(false),
            cancel_delivered: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            ready,
        })
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    /// Arm (or re-arm) the cancellation signal
    pub(crate) fn request_cancel(&self) {
        self.cancel_delivered.store(false, Ordering::Release);
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub(crate) fn was_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// One-shot delivery: true exactly once per `request_cancel`
    ///
    /// The suspension point that observes `true` raises `Cancelled` inside
    /// the body; a body that swallows it keeps running, and later suspension
    /// points do not re-deliver unless the task is cancelled again.
    pub(crate) fn take_cancel_signal(&self) -> bool {
        if !self.cancel_requested.load(Ordering::Acquire) {
            return false;
        }
        !self.cancel_delivered.swap(true, Ordering::AcqRel)
    }

    /// Queue the task for the next loop iteration (deduplicated)
    pub(crate) fn wake(&self) {
        if self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ready.push(self.id);
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }
}

/// A live task in the scheduler's table: the waker-visible cell plus the
/// resumable body. Bodies never leave the loop thread.
pub(crate) struct TaskEntry {
    pub(crate) cell: Arc<TaskCell>,
    pub(crate) body: Pin<Box<dyn StdFuture<Output = ()>>>,
}

// Waker vtable over Arc<TaskCell>: wake pushes the task id onto the ready
// queue. Hand-rolled rather than pulling in a futures-util dependency.

pub(crate) fn waker_for(cell: &Arc<TaskCell>) -> Waker {
    let ptr = Arc::into_raw(Arc::clone(cell)) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(ptr, &VTABLE)) }
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

unsafe fn clone_raw(ptr: *const ()) -> RawWaker {
    Arc::increment_strong_count(ptr as *const TaskCell);
    RawWaker::new(ptr, &VTABLE)
}

unsafe fn wake_raw(ptr: *const ()) {
    let cell = Arc::from_raw(ptr as *const TaskCell);
    cell.wake();
}

unsafe fn wake_by_ref_raw(ptr: *const ()) {
    let cell = std::mem::ManuallyDrop::new(Arc::from_raw(ptr as *const TaskCell));
    cell.wake();
}

unsafe fn drop_raw(ptr: *const ()) {
    drop(Arc::from_raw(ptr as *const TaskCell));
}

// The task currently being polled on this thread. Strand's suspension-point
// futures consult it to deliver cancellation; it is scheduler-internal state,
// not an ambient registry.

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskCell>>> = const { RefCell::new(None) };
}

pub(crate) struct CurrentGuard {
    prev: Option<Arc<TaskCell>>,
}

pub(crate) fn enter_current(cell: Arc<TaskCell>) -> CurrentGuard {
    CURRENT.with(|current| CurrentGuard {
        prev: current.borrow_mut().replace(cell),
    })
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| {
            *current.borrow_mut() = self.prev.take();
        });
    }
}

/// Take the pending cancellation signal of the task being polled, if any
pub(crate) fn current_cancel_signal() -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|cell| cell.take_cancel_signal())
    })
}

type WakerSlot = Arc<Mutex<Option<Waker>>>;

/// Shared poll logic for awaiting a [`Future`] cell at a suspension point
pub(crate) fn poll_shared<T: Clone>(
    future: &Future<T>,
    slot: &mut Option<WakerSlot>,
    cx: &mut Context<'_>,
) -> Poll<Result<T, TaskError>> {
    if current_cancel_signal() {
        return Poll::Ready(Err(TaskError::Cancelled));
    }
    if future.is_done() {
        return Poll::Ready(match future.error() {
            Some(error) => Err(error),
            None => Ok(future.value().expect("completed future holds a value")),
        });
    }
    match slot {
        Some(slot) => {
            // Refresh the waker; the registered callback wakes whichever
            // waker is current when the future turns terminal.
            *slot.lock() = Some(cx.waker().clone());
        }
        None => {
            let fresh: WakerSlot = Arc::new(Mutex::new(Some(cx.waker().clone())));
            *slot = Some(Arc::clone(&fresh));
            // If the future turned terminal in the meantime, on_done fires
            // inline and the wake arrives immediately.
            future.on_done(move |_| {
                if let Some(waker) = fresh.lock().take() {
                    waker.wake();
                }
            });
        }
    }
    Poll::Pending
}

/// Suspension-point adapter for any [`Future`] cell
///
/// Awaiting the adapter suspends the current cooperative task until the cell
/// is terminal, without ever blocking the loop thread. This is the supported
/// way to consume a worker-pool future from inside the loop;
/// [`Future::wait`] would freeze every task.
pub struct Awaited<T> {
    future: Future<T>,
    slot: Option<WakerSlot>,
}

impl<T> Awaited<T> {
    pub fn new(future: Future<T>) -> Self {
        Self { future, slot: None }
    }
}

impl<T: Clone> StdFuture for Awaited<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        poll_shared(&this.future, &mut this.slot, cx)
    }
}

/// Handle to a spawned cooperative task
///
/// Exposes the task's outcome cell, supports cooperative cancellation, and
/// implements `std::future::Future` so another task can await it.
pub struct TaskHandle<T> {
    cell: Arc<TaskCell>,
    future: Future<T>,
    slot: Option<WakerSlot>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(cell: Arc<TaskCell>, future: Future<T>) -> Self {
        Self {
            cell,
            future,
            slot: None,
        }
    }

    /// Get the task's unique ID
    pub fn id(&self) -> TaskId {
        self.cell.id()
    }

    /// Get the task's outcome cell
    pub fn future(&self) -> &Future<T> {
        &self.future
    }

    /// Get the scheduling state
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    /// Non-blocking; true iff the task reached a terminal state
    pub fn is_done(&self) -> bool {
        self.future.is_done()
    }

    /// Request cooperative cancellation
    ///
    /// A task that never started is cancelled outright and `true` is
    /// returned. A started task has the `Cancelled` signal delivered at its
    /// very next suspension point and `false` is returned here; whether the
    /// body honors the signal shows up in its terminal state instead.
    pub fn cancel(&self) -> bool {
        self.cell.request_cancel();
        let honored = self.future.cancel();
        if honored {
            self.cell.set_state(TaskState::Cancelled);
        }
        self.cell.wake();
        honored
    }
}

impl<T: Clone> StdFuture for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        poll_shared(&this.future, &mut this.slot, cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_ready_queue_is_fifo() {
        let ready = ReadyQueue::new();
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        ready.push(a);
        ready.push(b);
        ready.push(c);
        assert_eq!(ready.pop(), Some(a));
        assert_eq!(ready.pop(), Some(b));
        assert_eq!(ready.pop(), Some(c));
        assert_eq!(ready.pop(), None);
    }

    #[test]
    fn test_wake_is_deduplicated_until_cleared() {
        let ready = ReadyQueue::new();
        let cell = TaskCell::new(Arc::clone(&ready));
        cell.wake();
        cell.wake();
        assert_eq!(ready.pop(), Some(cell.id()));
        assert_eq!(ready.pop(), None);

        cell.clear_queued();
        cell.wake();
        assert_eq!(ready.pop(), Some(cell.id()));
    }

    #[test]
    fn test_cancel_signal_delivers_once_per_request() {
        let ready = ReadyQueue::new();
        let cell = TaskCell::new(ready);
        assert!(!cell.take_cancel_signal());

        cell.request_cancel();
        assert!(cell.take_cancel_signal());
        assert!(!cell.take_cancel_signal());
        assert!(cell.was_cancel_requested());

        // A second cancel re-arms delivery
        cell.request_cancel();
        assert!(cell.take_cancel_signal());
    }

    #[test]
    fn test_waker_wakes_cell() {
        let ready = ReadyQueue::new();
        let cell = TaskCell::new(Arc::clone(&ready));
        let waker = waker_for(&cell);
        waker.wake_by_ref();
        assert_eq!(ready.pop(), Some(cell.id()));

        cell.clear_queued();
        waker.clone().wake();
        assert_eq!(ready.pop(), Some(cell.id()));
    }
}
