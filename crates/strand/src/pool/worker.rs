//! Worker threads for the shared-memory pool
//!
//! Workers pull boxed jobs from the global injector in a polling loop. On
//! shutdown a worker drains the remaining queue before exiting, so accepted
//! work is never dropped.

use crossbeam_deque::{Injector, Steal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) type RunnableJob = Box<dyn FnOnce() + Send>;

pub(crate) struct PoolWorker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl PoolWorker {
    /// Spawn a worker thread serving the shared injector
    pub(crate) fn spawn(
        id: usize,
        injector: Arc<Injector<RunnableJob>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name(format!("strand-worker-{}", id))
            .spawn(move || Self::run_loop(id, injector, shutdown))
            .expect("failed to spawn pool worker thread");

        Self {
            id,
            handle: Some(handle),
        }
    }

    /// Worker thread main loop
    fn run_loop(id: usize, injector: Arc<Injector<RunnableJob>>, shutdown: Arc<AtomicBool>) {
        let _ = id;
        loop {
            match Self::find_work(&injector) {
                Some(job) => job(),
                None => {
                    // Drain before exit: only stop once the queue is empty
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    // No work available, sleep briefly to avoid busy-waiting
                    thread::sleep(Duration::from_micros(100));
                }
            }
        }

        #[cfg(debug_assertions)]
        eprintln!("strand-worker-{} shutting down", id);
    }

    fn find_work(injector: &Injector<RunnableJob>) -> Option<RunnableJob> {
        loop {
            match injector.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Block until the worker thread has exited
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_worker_executes_queued_jobs() {
        let injector: Arc<Injector<RunnableJob>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            injector.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let mut worker = PoolWorker::spawn(0, Arc::clone(&injector), Arc::clone(&shutdown));
        assert_eq!(worker.id(), 0);

        shutdown.store(true, Ordering::Release);
        worker.join();

        // The worker drained the queue before exiting
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(injector.is_empty());
    }
}
