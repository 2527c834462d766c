//! Counting semaphore with FIFO admission
//!
//! Bounds concurrency for both scheduling models: threads block on
//! [`acquire`](Semaphore::acquire), cooperative tasks suspend on
//! [`acquire_coop`](Semaphore::acquire_coop). Waiters are admitted first
//! blocked, first admitted — a released permit is handed directly to the
//! longest waiter rather than incremented and raced for, and an arriving
//! acquirer queues behind existing waiters instead of barging past them.
//!
//! Release happens only through [`SemaphoreGuard`] drop, so an error raised
//! inside the protected section can never leak a permit.

use crate::coop::task::current_cancel_signal;
use crate::error::TaskError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

enum WaitChannel {
    /// A blocked thread, parked on the waiter's condvar
    Thread,
    /// A suspended cooperative task, woken through its waker
    Task(Option<Waker>),
}

enum WaiterState {
    Waiting(WaitChannel),
    /// A permit was handed directly to this waiter
    Granted,
    /// The waiter gave up (cancelled or dropped); skip it on release
    Abandoned,
}

struct Waiter {
    state: Mutex<WaiterState>,
    signal: Condvar,
}

impl Waiter {
    fn thread() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WaiterState::Waiting(WaitChannel::Thread)),
            signal: Condvar::new(),
        })
    }

    fn task(waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WaiterState::Waiting(WaitChannel::Task(Some(waker)))),
            signal: Condvar::new(),
        })
    }
}

struct SemState {
    permits: usize,
    queue: VecDeque<Arc<Waiter>>,
}

/// Counting semaphore with FIFO waiter admission
pub struct Semaphore {
    state: Mutex<SemState>,
    max_permits: usize,
}

impl Semaphore {
    /// Create a semaphore with the given number of permits
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                permits,
                queue: VecDeque::new(),
            }),
            max_permits: permits,
        }
    }

    /// Current number of available permits
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Maximum number of permits
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Number of queued waiters
    pub fn waiting_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Take a permit without waiting, if one is free and nobody is queued
    pub fn try_acquire(&self) -> Option<SemaphoreGuard<'_>> {
        let mut state = self.state.lock();
        if state.queue.is_empty() && state.permits > 0 {
            state.permits -= 1;
            Some(SemaphoreGuard { sem: self })
        } else {
            None
        }
    }

    /// Block the calling thread until a permit is available
    ///
    /// Never call this from inside a cooperative task body; it would freeze
    /// the loop. Use [`acquire_coop`](Self::acquire_coop) there.
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let waiter = {
            let mut state = self.state.lock();
            if state.queue.is_empty() && state.permits > 0 {
                state.permits -= 1;
                return SemaphoreGuard { sem: self };
            }
            let waiter = Waiter::thread();
            state.queue.push_back(Arc::clone(&waiter));
            waiter
        };

        let mut wstate = waiter.state.lock();
        while matches!(*wstate, WaiterState::Waiting(_)) {
            waiter.signal.wait(&mut wstate);
        }
        // Granted: the permit was transferred directly, nothing to decrement
        SemaphoreGuard { sem: self }
    }

    /// Suspend the current cooperative task until a permit is available
    ///
    /// Resolves to `Err(TaskError::Cancelled)` when the task is cancelled
    /// while queued; an abandoned slot never swallows a permit.
    pub fn acquire_coop(&self) -> AcquireCoop<'_> {
        AcquireCoop {
            sem: self,
            waiter: None,
        }
    }

    /// Hand a permit to the longest waiter, or bank it if nobody waits
    fn release_one(&self) {
        let granted = {
            let mut state = self.state.lock();
            loop {
                match state.queue.pop_front() {
                    Some(waiter) => {
                        let mut wstate = waiter.state.lock();
                        match &mut *wstate {
                            WaiterState::Waiting(channel) => {
                                let waker = match channel {
                                    WaitChannel::Task(slot) => slot.take(),
                                    WaitChannel::Thread => None,
                                };
                                *wstate = WaiterState::Granted;
                                drop(wstate);
                                break Some((waiter, waker));
                            }
                            // Abandoned: skip and keep looking
                            _ => continue,
                        }
                    }
                    None => {
                        state.permits += 1;
                        break None;
                    }
                }
            }
        };

        if let Some((waiter, waker)) = granted {
            waiter.signal.notify_one();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

/// Scoped permit: released on drop, on every exit path
#[must_use = "the permit is released as soon as the guard is dropped"]
pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.release_one();
    }
}

/// Future returned by [`Semaphore::acquire_coop`]
pub struct AcquireCoop<'a> {
    sem: &'a Semaphore,
    waiter: Option<Arc<Waiter>>,
}

impl<'a> AcquireCoop<'a> {
    /// Walk away from the queue; returns a granted permit if one raced in
    fn abandon(&mut self) {
        let Some(waiter) = self.waiter.take() else {
            return;
        };
        let granted = {
            let mut wstate = waiter.state.lock();
            match *wstate {
                WaiterState::Granted => true,
                _ => {
                    *wstate = WaiterState::Abandoned;
                    false
                }
            }
        };
        if granted {
            // The permit arrived as we were leaving; pass it on
            self.sem.release_one();
        }
    }
}

impl<'a> StdFuture for AcquireCoop<'a> {
    type Output = Result<SemaphoreGuard<'a>, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if current_cancel_signal() {
            this.abandon();
            return Poll::Ready(Err(TaskError::Cancelled));
        }

        match &this.waiter {
            None => {
                let mut state = this.sem.state.lock();
                if state.queue.is_empty() && state.permits > 0 {
                    state.permits -= 1;
                    return Poll::Ready(Ok(SemaphoreGuard { sem: this.sem }));
                }
                let waiter = Waiter::task(cx.waker().clone());
                state.queue.push_back(Arc::clone(&waiter));
                this.waiter = Some(waiter);
                Poll::Pending
            }
            Some(waiter) => {
                let mut wstate = waiter.state.lock();
                match &mut *wstate {
                    WaiterState::Granted => {
                        drop(wstate);
                        this.waiter = None;
                        Poll::Ready(Ok(SemaphoreGuard { sem: this.sem }))
                    }
                    WaiterState::Waiting(WaitChannel::Task(slot)) => {
                        *slot = Some(cx.waker().clone());
                        Poll::Pending
                    }
                    _ => Poll::Pending,
                }
            }
        }
    }
}

impl Drop for AcquireCoop<'_> {
    fn drop(&mut self) {
        self.abandon();
    }
}
