//! Isolated worker pool (CPU profile)
//!
//! Workers do not share memory with the submitter: a job and its output must
//! both survive a serialization round-trip, so every value crossing the
//! boundary is an unshared copy. Failures during serialization surface as
//! [`TaskError::Serialization`]; a worker dying mid-job surfaces as
//! [`TaskError::WorkerLost`] instead of hanging the submitter.

use crate::error::{ShutdownError, TaskError};
use crate::future::Future;
use crate::pool::{cpu_worker_count, MapResults, Outstanding};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A unit of work that can cross the isolation boundary
///
/// The job value is serialized on submission and deserialized inside the
/// worker; the output makes the reverse trip. The job type therefore encodes
/// both the arguments and the function to run on them.
pub trait Job: Serialize + DeserializeOwned + Send + 'static {
    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn run(self) -> Result<Self::Output, TaskError>;
}

struct Request<J: Job> {
    payload: Vec<u8>,
    future: Future<J::Output>,
    outstanding: Arc<Outstanding>,
}

/// Fixed-size pool of isolated workers for CPU-bound work
///
/// Shares the interface shape of [`ThreadPool`](crate::pool::ThreadPool)
/// (`submit`, `map`, `shutdown`) but accepts only [`Job`] values, never
/// closures over shared state. One pool serves one job type.
pub struct IsolatedPool<J: Job> {
    sender: Mutex<Option<Sender<Request<J>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    accepting: AtomicBool,
    outstanding: Arc<Outstanding>,
}

impl<J: Job> IsolatedPool<J> {
    /// Create a pool with the CPU-profile default worker count
    pub fn new() -> Self {
        Self::with_workers(cpu_worker_count())
    }

    /// Create a pool with an explicit worker count (minimum 1)
    pub fn with_workers(worker_count: usize) -> Self {
        let count = worker_count.max(1);
        let (sender, receiver) = channel::unbounded::<Request<J>>();

        let handles = (0..count)
            .map(|id| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("strand-isolated-{}", id))
                    .spawn(move || Self::run_loop(id, receiver))
                    .expect("failed to spawn isolated worker thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            worker_count: count,
            accepting: AtomicBool::new(true),
            outstanding: Arc::new(Outstanding::new()),
        }
    }

    /// Number of isolated workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True once shutdown has been requested
    pub fn is_shut_down(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Serialize the job and hand it to a free worker
    ///
    /// The future is returned immediately. A job that cannot be serialized
    /// resolves the future with [`TaskError::Serialization`] rather than
    /// failing the submission.
    pub fn submit(&self, job: J) -> Result<Future<J::Output>, ShutdownError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ShutdownError);
        }

        let future = Future::pending();
        let payload = match serde_json::to_vec(&job) {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = future.fail(TaskError::Serialization(err.to_string()));
                return Ok(future);
            }
        };

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(ShutdownError);
        };

        self.outstanding.incr();
        let request = Request {
            payload,
            future: future.clone(),
            outstanding: Arc::clone(&self.outstanding),
        };
        if sender.send(request).is_err() {
            // Channel closed under us: every worker is gone
            self.outstanding.decr();
            let _ = future.fail(TaskError::WorkerLost);
        }
        Ok(future)
    }

    /// Submit one job per element and return results in input order
    pub fn map(&self, jobs: impl IntoIterator<Item = J>) -> Result<MapResults<J::Output>, ShutdownError> {
        let mut futures = VecDeque::new();
        for job in jobs {
            futures.push_back(self.submit(job)?);
        }
        Ok(MapResults::new(futures))
    }

    /// Stop accepting new submissions; queued work still drains
    ///
    /// Closing the request channel lets each worker drain it and exit. With
    /// `wait_for_pending` the call blocks until the workers are done.
    pub fn shutdown(&self, wait_for_pending: bool) {
        self.accepting.store(false, Ordering::Release);
        drop(self.sender.lock().take());
        if wait_for_pending {
            for handle in self.handles.lock().drain(..) {
                let _ = handle.join();
            }
        }
    }

    /// Worker thread main loop: drain requests until the channel closes
    fn run_loop(id: usize, receiver: Receiver<Request<J>>) {
        let _ = id;
        while let Ok(request) = receiver.recv() {
            let outstanding = Arc::clone(&request.outstanding);
            Self::serve(request);
            outstanding.decr();
        }

        #[cfg(debug_assertions)]
        eprintln!("strand-isolated-{} shutting down", id);
    }

    fn serve(request: Request<J>) {
        let Request { payload, future, .. } = request;
        if !future.mark_running() {
            // Cancelled while still queued; the job never runs
            return;
        }

        let job: J = match serde_json::from_slice(&payload) {
            Ok(job) => job,
            Err(err) => {
                let _ = future.fail(TaskError::Serialization(err.to_string()));
                return;
            }
        };

        // A panic here is the moral equivalent of an isolated worker dying
        // mid-job: the submitter gets WorkerLost instead of hanging forever.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));
        let result = match outcome {
            Ok(result) => result,
            Err(_payload) => {
                #[cfg(debug_assertions)]
                eprintln!(
                    "strand-isolated worker lost: {}",
                    crate::pool::panic_message(_payload.as_ref())
                );
                let _ = future.fail(TaskError::WorkerLost);
                return;
            }
        };

        match result {
            Ok(output) => match round_trip(&output) {
                Ok(copy) => {
                    let _ = future.complete(copy);
                }
                Err(err) => {
                    let _ = future.fail(err);
                }
            },
            Err(err) => {
                let _ = future.fail(err);
            }
        }
    }
}

impl<J: Job> Default for IsolatedPool<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Job> Drop for IsolatedPool<J> {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

/// Force the output through the boundary so the submitter only ever sees an
/// unshared copy
fn round_trip<O: Serialize + DeserializeOwned>(output: &O) -> Result<O, TaskError> {
    let bytes =
        serde_json::to_vec(output).map_err(|err| TaskError::Serialization(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| TaskError::Serialization(err.to_string()))
}
