//! # strand
//!
//! A concurrent task-execution core built around a write-once [`Future`]
//! cell. One future abstraction is shared by three executors:
//!
//! - [`ThreadPool`] — worker threads sharing process memory (I/O profile)
//! - [`IsolatedPool`] — workers behind a serialized boundary (CPU profile)
//! - [`Scheduler`] — a single-threaded cooperative run loop driving
//!   suspendable task bodies
//!
//! Submitted work resolves its future exactly once; submitters observe the
//! outcome by blocking ([`Future::wait`], [`Future::result`]), by callback
//! ([`Future::on_done`]), or — inside the cooperative loop — by awaiting
//! ([`Awaited`], [`TaskHandle`]). Aggregation helpers ([`gather_all`],
//! [`as_completed`], [`wait_first`], [`wait_all`]) consume groups of futures
//! from either side.
//!
//! ## Blocking and the cooperative loop
//!
//! The cooperative scheduler runs every task body on one thread; a body that
//! performs an uninterruptible blocking wait freezes the whole loop. Inside a
//! task body use the loop's suspension points ([`SchedulerHandle::sleep`],
//! [`Semaphore::acquire_coop`], awaiting a [`TaskHandle`] or [`Awaited`])
//! and keep the blocking calls ([`Future::wait`], [`Semaphore::acquire`]) for
//! plain threads.
//!
//! ## Cancellation
//!
//! Cancellation is always cooperative. [`Future::cancel`] only prevents work
//! that has not started; running pool jobs observe a [`CancelToken`], and
//! running cooperative tasks have [`TaskError::Cancelled`] raised at their
//! next suspension point. There is no forced-termination path.

pub mod agg;
pub mod coop;
pub mod error;
pub mod future;
pub mod pool;
pub mod sync;

pub use agg::{as_completed, gather, gather_all, wait_all, wait_first, AsCompleted, WaitOutcome};
pub use coop::{
    Awaited, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats, Sleep, TaskHandle,
    TaskId, TaskState, Timeout, YieldNow,
};
pub use error::{InvalidState, ShutdownError, TaskError, WaitError};
pub use future::{CancelToken, Future, FutureId, FutureState};
pub use pool::{
    cpu_worker_count, io_worker_count, IsolatedPool, Job, MapResults, ThreadPool,
};
pub use sync::{AcquireCoop, Semaphore, SemaphoreGuard};
