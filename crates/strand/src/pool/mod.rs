//! Worker-pool executors
//!
//! Two named configurations share the same interface shape and differ only in
//! isolation guarantees:
//!
//! - [`ThreadPool`] (I/O profile): workers share process memory. Concurrent
//!   mutation of shared state requires external locking, not provided here.
//! - [`IsolatedPool`] (CPU profile): workers are isolated and exchange only
//!   serialized arguments and results; every value crossing the boundary is
//!   an unshared copy.

mod isolated;
mod thread;
mod worker;

pub use isolated::{IsolatedPool, Job};
pub use thread::ThreadPool;

use crate::error::TaskError;
use crate::future::{CancelToken, Future};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

/// Default worker count for the I/O profile: a small constant times the
/// available parallelism, capped so an over-provisioned host does not spawn
/// hundreds of mostly-idle threads.
pub fn io_worker_count() -> usize {
    std::cmp::min(32, num_cpus::get().saturating_mul(4)).max(1)
}

/// Default worker count for the CPU profile: one worker per unit of
/// available parallelism.
pub fn cpu_worker_count() -> usize {
    num_cpus::get().max(1)
}

/// Ordered sequence of results, one per submitted item, **in submission
/// order regardless of completion order**
///
/// Consuming the iterator blocks on each future as it is reached, so a single
/// slow head item stalls downstream consumption even when later items
/// finished sooner.
pub struct MapResults<T> {
    futures: VecDeque<Future<T>>,
}

impl<T> MapResults<T> {
    pub(crate) fn new(futures: VecDeque<Future<T>>) -> Self {
        Self { futures }
    }

    /// Number of results not yet consumed
    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Detach the remaining futures, in submission order
    pub fn into_futures(self) -> Vec<Future<T>> {
        self.futures.into()
    }
}

impl<T: Clone> Iterator for MapResults<T> {
    type Item = Result<T, TaskError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.futures.pop_front().map(|fut| fut.wait())
    }
}

/// Count of accepted-but-unfinished jobs, used by draining shutdown
pub(crate) struct Outstanding {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Outstanding {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    pub(crate) fn incr(&self) {
        *self.count.lock() += 1;
    }

    pub(crate) fn decr(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Block until every accepted job has reached a terminal state
    pub(crate) fn wait_empty(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

/// Run one job and resolve its future, capturing errors and panics
///
/// Never lets a job failure escape into the worker loop: an error is stored
/// on the future and a panic becomes [`TaskError::Panicked`]. A future that
/// is already terminal (cancelled while queued) is skipped without running
/// the job.
pub(crate) fn run_job<T, F>(future: &Future<T>, job: F)
where
    F: FnOnce(&CancelToken) -> Result<T, TaskError>,
{
    if !future.mark_running() {
        return;
    }
    let token = future.cancel_token();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(&token)));
    let result = match outcome {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    };
    match result {
        Ok(value) => {
            let _ = future.complete(value);
        }
        Err(error) => {
            let _ = future.fail(error);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
