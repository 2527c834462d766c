//! Aggregation over groups of futures
//!
//! Combinators for consuming many [`Future`] cells at once: order-preserving
//! collection ([`gather_all`]), completion-order iteration ([`as_completed`]),
//! threshold waits ([`wait_first`], [`wait_all`]), and a cooperative
//! convenience ([`gather`]) for awaiting a batch of spawned tasks. All of them
//! observe futures through `on_done` callbacks; none of them cancel or
//! otherwise steer the underlying work.

use crate::coop::{Awaited, TaskHandle};
use crate::error::TaskError;
use crate::future::Future;
use crossbeam::channel::{self, Receiver};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct GatherState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    failed: bool,
}

/// Collect a group of futures into one `Future<Vec<T>>`, preserving order
///
/// The result completes with values in input order once every input is
/// Completed, and fails fast with the first error observed in completion
/// order. Inputs that finish after the failure are ignored by the aggregate
/// but stay individually resolvable. An empty input completes immediately.
pub fn gather_all<T>(futures: &[Future<T>]) -> Future<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let result = Future::pending();
    if futures.is_empty() {
        let _ = result.complete(Vec::new());
        return result;
    }

    let state = Arc::new(Mutex::new(GatherState {
        slots: (0..futures.len()).map(|_| None).collect(),
        remaining: futures.len(),
        failed: false,
    }));

    for (index, future) in futures.iter().enumerate() {
        let state = Arc::clone(&state);
        let result = result.clone();
        future.on_done(move |f| {
            let ready = {
                let mut state = state.lock();
                if state.failed {
                    return;
                }
                match f.error() {
                    Some(error) => {
                        state.failed = true;
                        drop(state);
                        let _ = result.fail(error);
                        return;
                    }
                    None => {
                        state.slots[index] = f.value();
                        state.remaining -= 1;
                        if state.remaining > 0 {
                            return;
                        }
                        state
                            .slots
                            .iter_mut()
                            .map(|slot| slot.take().expect("all slots filled"))
                            .collect::<Vec<_>>()
                    }
                }
            };
            let _ = result.complete(ready);
        });
    }

    result
}

/// Iterator over a group of futures in completion order
///
/// Returned by [`as_completed`]. Each input future is yielded exactly once,
/// already terminal; `next` blocks until the earliest unyielded completion.
pub struct AsCompleted<T> {
    slots: Vec<Option<Future<T>>>,
    completions: Receiver<usize>,
    remaining: usize,
}

impl<T> Iterator for AsCompleted<T> {
    type Item = Future<T>;

    fn next(&mut self) -> Option<Future<T>> {
        while self.remaining > 0 {
            let index = self.completions.recv().ok()?;
            // A future may appear twice if the caller passed duplicates of
            // the same cell; the slot check keeps each position single-yield.
            if let Some(future) = self.slots[index].take() {
                self.remaining -= 1;
                return Some(future);
            }
        }
        None
    }
}

/// Iterate a group of futures as they finish, earliest completion first
///
/// Lazy and single-pass: completions are observed through `on_done` feeding a
/// channel, and each call to `next` blocks only until one more future turns
/// terminal. Nothing here waits for stragglers the caller stops iterating
/// over.
pub fn as_completed<T>(futures: &[Future<T>]) -> AsCompleted<T>
where
    T: Send + 'static,
{
    let (sender, completions) = channel::unbounded();
    for (index, future) in futures.iter().enumerate() {
        let sender = sender.clone();
        future.on_done(move |_| {
            let _ = sender.send(index);
        });
    }
    AsCompleted {
        slots: futures.iter().map(|f| Some(f.clone())).collect(),
        completions,
        remaining: futures.len(),
    }
}

/// Result of a threshold wait: terminal futures on one side, the rest on the
/// other. Pending futures are left running untouched.
pub struct WaitOutcome<T> {
    pub done: Vec<Future<T>>,
    pub pending: Vec<Future<T>>,
}

/// Block until at least one of the futures is terminal
///
/// With an empty input returns immediately with two empty partitions.
pub fn wait_first<T>(futures: &[Future<T>]) -> WaitOutcome<T>
where
    T: Send + 'static,
{
    let threshold = usize::min(1, futures.len());
    partition_when(futures, threshold)
}

/// Block until every future is terminal
pub fn wait_all<T>(futures: &[Future<T>]) -> WaitOutcome<T>
where
    T: Send + 'static,
{
    partition_when(futures, futures.len())
}

fn partition_when<T>(futures: &[Future<T>], threshold: usize) -> WaitOutcome<T>
where
    T: Send + 'static,
{
    let gate = Arc::new((Mutex::new(0usize), Condvar::new()));
    for future in futures {
        let gate = Arc::clone(&gate);
        future.on_done(move |_| {
            let (count, signal) = &*gate;
            *count.lock() += 1;
            signal.notify_all();
        });
    }

    {
        let (count, signal) = &*gate;
        let mut done = count.lock();
        while *done < threshold {
            signal.wait(&mut done);
        }
    }

    let mut outcome = WaitOutcome {
        done: Vec::new(),
        pending: Vec::new(),
    };
    for future in futures {
        if future.is_done() {
            outcome.done.push(future.clone());
        } else {
            outcome.pending.push(future.clone());
        }
    }
    outcome
}

/// Await a batch of cooperative tasks, collecting values in spawn order
///
/// Suspends the calling task until every handle's future is terminal or one
/// fails; semantics match [`gather_all`]. Usable only inside a scheduler.
pub async fn gather<T>(handles: &[TaskHandle<T>]) -> Result<Vec<T>, TaskError>
where
    T: Clone + Send + 'static,
{
    let futures: Vec<Future<T>> = handles.iter().map(|h| h.future().clone()).collect();
    Awaited::new(gather_all(&futures)).await
}
