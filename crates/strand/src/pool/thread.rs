//! Shared-memory worker pool (I/O profile)

use crate::error::{ShutdownError, TaskError};
use crate::future::{CancelToken, Future};
use crate::pool::worker::{PoolWorker, RunnableJob};
use crate::pool::{io_worker_count, run_job, MapResults, Outstanding};
use crossbeam_deque::Injector;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fixed-size pool of long-lived worker threads sharing process memory
///
/// Each submitted callable produces exactly one [`Future`]. An error raised
/// inside a callable is captured into its future and never propagates out of
/// the worker loop; a panicking job cannot take a worker down.
///
/// Workers share memory with the submitter: closures may capture `Arc`s and
/// mutate shared state, and synchronizing that state is the caller's job.
/// For isolated workers see [`IsolatedPool`](crate::pool::IsolatedPool).
pub struct ThreadPool {
    injector: Arc<Injector<RunnableJob>>,
    workers: Mutex<Vec<PoolWorker>>,
    worker_count: usize,
    shutdown: Arc<AtomicBool>,
    accepting: AtomicBool,
    outstanding: Arc<Outstanding>,
}

impl ThreadPool {
    /// Create a pool with the I/O-profile default worker count
    pub fn new() -> Self {
        Self::with_workers(io_worker_count())
    }

    /// Create a pool with an explicit worker count (minimum 1)
    pub fn with_workers(worker_count: usize) -> Self {
        let count = worker_count.max(1);
        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..count)
            .map(|id| PoolWorker::spawn(id, Arc::clone(&injector), Arc::clone(&shutdown)))
            .collect();

        Self {
            injector,
            workers: Mutex::new(workers),
            worker_count: count,
            shutdown,
            accepting: AtomicBool::new(true),
            outstanding: Arc::new(Outstanding::new()),
        }
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True once shutdown has been requested
    pub fn is_shut_down(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Enqueue a callable; a free worker executes it and resolves the future
    ///
    /// The future is returned immediately. Errors raised by the job are
    /// captured into the future, never thrown from `submit`.
    pub fn submit<T, F>(&self, job: F) -> Result<Future<T>, ShutdownError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    {
        self.submit_with_token(move |_| job())
    }

    /// As [`submit`](Self::submit), passing the job a [`CancelToken`] it may
    /// poll to honor cooperative cancellation
    pub fn submit_with_token<T, F>(&self, job: F) -> Result<Future<T>, ShutdownError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T, TaskError> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ShutdownError);
        }

        let future = Future::pending();
        let resolver = future.clone();
        let outstanding = Arc::clone(&self.outstanding);
        self.outstanding.incr();

        self.injector.push(Box::new(move || {
            run_job(&resolver, job);
            outstanding.decr();
        }));

        Ok(future)
    }

    /// Submit one job per item and return results in input order
    ///
    /// Completion order is irrelevant to the output: if the first item takes
    /// longest, all results wait for it.
    pub fn map<T, F, I>(&self, f: F, items: I) -> Result<MapResults<T>, ShutdownError>
    where
        T: Send + 'static,
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) -> Result<T, TaskError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut futures = VecDeque::new();
        for item in items {
            let f = Arc::clone(&f);
            futures.push_back(self.submit(move || f(item))?);
        }
        Ok(MapResults::new(futures))
    }

    /// Stop accepting new submissions; outstanding work still drains
    ///
    /// With `wait_for_pending` the call blocks until every accepted job has
    /// reached a terminal state and the workers have exited. Without it the
    /// workers keep draining in the background and are joined on drop.
    pub fn shutdown(&self, wait_for_pending: bool) {
        self.accepting.store(false, Ordering::Release);
        if wait_for_pending {
            self.outstanding.wait_empty();
        }
        self.shutdown.store(true, Ordering::Release);
        if wait_for_pending {
            for worker in self.workers.lock().iter_mut() {
                worker.join();
            }
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.lock().iter_mut() {
            worker.join();
        }
    }
}
