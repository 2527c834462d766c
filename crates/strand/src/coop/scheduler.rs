//! Single-threaded cooperative run loop
//!
//! Exactly one logical thread of control: suspension happens only at explicit
//! await points, so no two task bodies ever execute concurrently and data
//! races are ruled out by construction. The flip side is documented rather
//! than tolerated silently: a body that performs an uninterruptible blocking
//! wait (a bare `thread::sleep`, [`Future::wait`](crate::future::Future::wait),
//! a blocking [`Semaphore::acquire`](crate::sync::Semaphore::acquire)) freezes
//! the loop and starves every other task. Inside a body, always use the
//! loop's own suspension points: [`SchedulerHandle::sleep`], awaiting a
//! [`TaskHandle`](crate::coop::TaskHandle) or an
//! [`Awaited`](crate::coop::Awaited) cell, or
//! [`Semaphore::acquire_coop`](crate::sync::Semaphore::acquire_coop).

use crate::coop::task::{
    enter_current, waker_for, ReadyQueue, TaskCell, TaskEntry, TaskHandle, TaskId, TaskState,
};
use crate::coop::timer::{Sleep, Timeout, TimerQueue, YieldNow};
use crate::error::TaskError;
use crate::future::Future;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::future::Future as StdFuture;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Scheduler configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerConfig {
    /// What happens when a cancelled task swallows the `Cancelled` signal
    /// and completes normally: with `false` (the default) the completion
    /// stands — cancellation was not honored; with `true` the terminal state
    /// is forced to Cancelled regardless.
    pub strict_cancellation: bool,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks retired (terminal state reached)
    pub tasks_completed: u64,

    /// Currently live tasks
    pub active_tasks: usize,

    /// Tasks currently parked on a timer
    pub sleeping_tasks: usize,
}

pub(crate) struct Shared {
    ready: Arc<ReadyQueue>,
    timers: Rc<TimerQueue>,
    tasks: RefCell<FxHashMap<TaskId, TaskEntry>>,
    config: SchedulerConfig,
    spawned: Cell<u64>,
    completed: Cell<u64>,
}

/// Single-threaded cooperative scheduler
///
/// Owns the task table, the ready queue, and the timer heap. Explicitly
/// constructed and explicitly owned; hand out [`SchedulerHandle`]s to code
/// that needs to spawn or sleep instead of reaching for a global.
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                ready: ReadyQueue::new(),
                timers: Rc::new(TimerQueue::new()),
                tasks: RefCell::new(FxHashMap::default()),
                config,
                spawned: Cell::new(0),
                completed: Cell::new(0),
            }),
        }
    }

    /// Get a cloneable handle for spawning and sleeping
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Get current scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_spawned: self.shared.spawned.get(),
            tasks_completed: self.shared.completed.get(),
            active_tasks: self.shared.tasks.borrow().len(),
            sleeping_tasks: self.shared.timers.sleeping_count(),
        }
    }

    /// Drive the loop until the root body reaches a terminal state
    ///
    /// Everything the root transitively awaited is terminal by then. Tasks
    /// that were spawned but never awaited may still be live when `run`
    /// returns; they resume on the next `run` call or are dropped with the
    /// scheduler.
    pub fn run<T, F>(&self, body: F) -> Result<T, TaskError>
    where
        T: Clone + 'static,
        F: StdFuture<Output = Result<T, TaskError>> + 'static,
    {
        let root = self.handle().spawn(body);
        let root_future = root.future().clone();

        while !root_future.is_done() {
            if !self.tick() {
                self.park();
            }
        }

        match root_future.error() {
            Some(error) => Err(error),
            None => Ok(root_future
                .value()
                .expect("completed future holds a value")),
        }
    }

    /// Run one loop iteration: fire due timers, then poll the next ready
    /// task. Returns false when no task was ready.
    fn tick(&self) -> bool {
        self.shared.timers.fire_due(Instant::now());

        let Some(id) = self.shared.ready.pop() else {
            return false;
        };
        let Some(mut entry) = self.shared.tasks.borrow_mut().remove(&id) else {
            // Woken after retirement; nothing to do
            return true;
        };
        // Clear before polling so wakes arriving mid-poll re-queue the task
        entry.cell.clear_queued();

        if entry.cell.state().is_terminal() {
            // Cancelled before it ever ran; retire without polling
            self.shared.completed.set(self.shared.completed.get() + 1);
            return true;
        }

        entry.cell.set_state(TaskState::Running);
        let waker = waker_for(&entry.cell);
        let mut cx = Context::from_waker(&waker);
        let poll = {
            let _current = enter_current(Arc::clone(&entry.cell));
            entry.body.as_mut().poll(&mut cx)
        };

        match poll {
            Poll::Ready(()) => {
                // The wrapper resolved the future and set the terminal state
                self.shared.completed.set(self.shared.completed.get() + 1);
            }
            Poll::Pending => {
                entry.cell.set_state(TaskState::Suspended);
                self.shared.tasks.borrow_mut().insert(id, entry);
            }
        }
        true
    }

    /// Park until the nearest timer deadline or an external wake
    fn park(&self) {
        self.shared.ready.park_until(self.shared.timers.next_wake());
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable spawning/sleeping handle onto a [`Scheduler`]
///
/// Handles hold a weak reference; using one after the scheduler is dropped
/// is a programming error and panics.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Weak<Shared>,
}

impl SchedulerHandle {
    fn shared(&self) -> Rc<Shared> {
        self.shared.upgrade().expect("scheduler no longer exists")
    }

    /// Spawn a task body, scheduled for a later loop iteration
    ///
    /// The body never runs inline: the spawner keeps running until it next
    /// suspends. Returns a [`TaskHandle`] the spawner may await, cancel, or
    /// hand off.
    pub fn spawn<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Clone + 'static,
        F: StdFuture<Output = Result<T, TaskError>> + 'static,
    {
        let shared = self.shared();
        let future = Future::pending();
        let cell = TaskCell::new(Arc::clone(&shared.ready));

        let wrapper = {
            let future = future.clone();
            let cell = Arc::clone(&cell);
            let strict = shared.config.strict_cancellation;
            async move {
                let _ = future.mark_running();
                let outcome = body.await;
                let end_state = match outcome {
                    Ok(value) => {
                        if strict && cell.was_cancel_requested() {
                            let _ = future.fail(TaskError::Cancelled);
                            TaskState::Cancelled
                        } else {
                            let _ = future.complete(value);
                            TaskState::Completed
                        }
                    }
                    Err(TaskError::Cancelled) => {
                        let _ = future.fail(TaskError::Cancelled);
                        TaskState::Cancelled
                    }
                    Err(error) => {
                        #[cfg(debug_assertions)]
                        eprintln!("strand-coop: task failed: {}", error);
                        let _ = future.fail(error);
                        TaskState::Failed
                    }
                };
                cell.set_state(end_state);
            }
        };

        shared.tasks.borrow_mut().insert(
            cell.id(),
            TaskEntry {
                cell: Arc::clone(&cell),
                body: Box::pin(wrapper),
            },
        );
        cell.set_state(TaskState::Scheduled);
        cell.wake();
        shared.spawned.set(shared.spawned.get() + 1);

        TaskHandle::new(cell, future)
    }

    /// Suspend the current task for at least `duration`
    ///
    /// Never blocks the loop thread; the task resumes once the wake time has
    /// passed and no earlier-ready task is ahead of it in the queue.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(Rc::clone(&self.shared().timers), Instant::now() + duration)
    }

    /// Bound an await with a deadline
    ///
    /// Races `body` against a sleep of `duration`; if the deadline passes
    /// first the await resolves to `Err(WaitError::Timeout)` and the
    /// underlying work keeps running — the deadline detaches the waiter, it
    /// never cancels. Works over any suspension-point future: a
    /// [`TaskHandle`](crate::coop::TaskHandle), an
    /// [`Awaited`](crate::coop::Awaited) cell, or a whole `async` block.
    pub fn timeout<F>(&self, duration: Duration, body: F) -> Timeout<F>
    where
        F: StdFuture,
    {
        Timeout::new(body, self.sleep(duration))
    }

    /// Yield to the loop for one tick
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new()
    }
}
