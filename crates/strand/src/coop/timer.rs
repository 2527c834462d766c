//! Timer queue for cooperative sleeps
//!
//! Instead of polling for sleeping tasks, the loop keeps a min-heap of wake
//! times and parks until the earliest one. `sleep` never blocks the thread:
//! it registers a wake time and yields to the loop, which resumes the task
//! no earlier than that time, FIFO among tasks whose wake time has passed.

use crate::coop::task::current_cancel_signal;
use crate::error::{TaskError, WaitError};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

/// Entry in the timer heap
pub(crate) struct SleepEntry {
    /// When to wake this task
    wake_at: Instant,
    /// Registration order, for FIFO on equal wake times
    seq: u64,
    /// Waker to fire when due
    waker: Waker,
}

// Reverse ordering for min-heap (earliest wake time first)
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for SleepEntry {}

/// Min-heap of pending wake times, owned by the loop thread
pub(crate) struct TimerQueue {
    sleeping: RefCell<BinaryHeap<SleepEntry>>,
    next_seq: Cell<u64>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            sleeping: RefCell::new(BinaryHeap::new()),
            next_seq: Cell::new(0),
        }
    }

    /// Register a waker to fire at a specific time
    pub(crate) fn register(&self, wake_at: Instant, waker: Waker) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.sleeping.borrow_mut().push(SleepEntry {
            wake_at,
            seq,
            waker,
        });
    }

    /// Earliest pending wake time, if any
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.sleeping.borrow().peek().map(|entry| entry.wake_at)
    }

    /// Fire every entry whose wake time has passed, earliest first
    pub(crate) fn fire_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let due = matches!(
                self.sleeping.borrow().peek(),
                Some(entry) if entry.wake_at <= now
            );
            if !due {
                break;
            }
            let entry = self
                .sleeping
                .borrow_mut()
                .pop()
                .expect("peeked timer entry exists");
            entry.waker.wake();
            fired += 1;
        }
        fired
    }

    /// Number of sleeping entries (for stats/debugging)
    pub(crate) fn sleeping_count(&self) -> usize {
        self.sleeping.borrow().len()
    }
}

/// Future returned by [`SchedulerHandle::sleep`](crate::coop::SchedulerHandle::sleep)
///
/// Suspends the current task until the wake time; the loop thread is never
/// blocked. Resolves to `Err(TaskError::Cancelled)` when the task is
/// cancelled while sleeping.
pub struct Sleep {
    timers: Rc<TimerQueue>,
    wake_at: Instant,
    registered: bool,
}

impl Sleep {
    pub(crate) fn new(timers: Rc<TimerQueue>, wake_at: Instant) -> Self {
        Self {
            timers,
            wake_at,
            registered: false,
        }
    }
}

impl StdFuture for Sleep {
    type Output = Result<(), TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if current_cancel_signal() {
            return Poll::Ready(Err(TaskError::Cancelled));
        }
        if Instant::now() >= this.wake_at {
            return Poll::Ready(Ok(()));
        }
        if !this.registered {
            this.timers.register(this.wake_at, cx.waker().clone());
            this.registered = true;
        }
        Poll::Pending
    }
}

/// Future returned by [`SchedulerHandle::timeout`](crate::coop::SchedulerHandle::timeout)
///
/// Races the inner future against a deadline. If the deadline passes first
/// the result is `Err(WaitError::Timeout)`; like
/// [`Future::result`](crate::future::Future::result) on the thread side, the
/// timeout detaches the waiter only — the underlying work keeps running
/// unless it is explicitly cancelled.
pub struct Timeout<F> {
    inner: Pin<Box<F>>,
    sleep: Sleep,
}

impl<F> Timeout<F> {
    pub(crate) fn new(inner: F, sleep: Sleep) -> Self {
        Self {
            inner: Box::pin(inner),
            sleep,
        }
    }
}

impl<T, F> StdFuture for Timeout<F>
where
    F: StdFuture<Output = Result<T, TaskError>>,
{
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // Inner goes first so a result that is already available wins even
        // when the deadline has also passed.
        if let Poll::Ready(outcome) = this.inner.as_mut().poll(cx) {
            return Poll::Ready(outcome.map_err(WaitError::Task));
        }
        match Pin::new(&mut this.sleep).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Err(WaitError::Timeout)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(WaitError::Task(err))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future that yields to the loop exactly once
///
/// The cheapest suspension point: lets every other ready task run one tick.
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new() -> Self {
        Self { yielded: false }
    }
}

impl StdFuture for YieldNow {
    type Output = Result<(), TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if current_cancel_signal() {
            return Poll::Ready(Err(TaskError::Cancelled));
        }
        if this.yielded {
            Poll::Ready(Ok(()))
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_waker(count: Arc<AtomicUsize>) -> Waker {
        // Minimal waker for heap tests; the scheduler uses its own vtable.
        use std::task::{RawWaker, RawWakerVTable};

        unsafe fn clone_raw(ptr: *const ()) -> RawWaker {
            Arc::increment_strong_count(ptr as *const AtomicUsize);
            RawWaker::new(ptr, &VTABLE)
        }
        unsafe fn wake_raw(ptr: *const ()) {
            let count = Arc::from_raw(ptr as *const AtomicUsize);
            count.fetch_add(1, AtomicOrdering::SeqCst);
        }
        unsafe fn wake_by_ref_raw(ptr: *const ()) {
            let count = std::mem::ManuallyDrop::new(Arc::from_raw(ptr as *const AtomicUsize));
            count.fetch_add(1, AtomicOrdering::SeqCst);
        }
        unsafe fn drop_raw(ptr: *const ()) {
            drop(Arc::from_raw(ptr as *const AtomicUsize));
        }
        static VTABLE: RawWakerVTable =
            RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

        let ptr = Arc::into_raw(count) as *const ();
        unsafe { Waker::from_raw(RawWaker::new(ptr, &VTABLE)) }
    }

    #[test]
    fn test_fire_due_wakes_in_time_order() {
        let timers = TimerQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        timers.register(now + Duration::from_millis(30), counting_waker(Arc::clone(&count)));
        timers.register(now + Duration::from_millis(10), counting_waker(Arc::clone(&count)));
        timers.register(now + Duration::from_millis(20), counting_waker(Arc::clone(&count)));
        assert_eq!(timers.sleeping_count(), 3);
        assert_eq!(timers.next_wake(), Some(now + Duration::from_millis(10)));

        // Nothing due yet
        assert_eq!(timers.fire_due(now), 0);

        // Two entries due at +25ms
        assert_eq!(timers.fire_due(now + Duration::from_millis(25)), 2);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(timers.next_wake(), Some(now + Duration::from_millis(30)));

        assert_eq!(timers.fire_due(now + Duration::from_millis(40)), 1);
        assert_eq!(timers.sleeping_count(), 0);
    }

    #[test]
    fn test_equal_wake_times_fire_fifo() {
        let timers = TimerQueue::new();
        let at = Instant::now();
        timers.register(at, counting_waker(Arc::new(AtomicUsize::new(0))));
        timers.register(at, counting_waker(Arc::new(AtomicUsize::new(0))));

        // Pop one at a time to observe ordering
        let heap = timers.sleeping.borrow();
        let head = heap.peek().expect("entries registered");
        assert_eq!(head.seq, 0);
    }
}
