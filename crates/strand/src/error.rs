//! Error kinds shared across the executors

use crate::future::FutureState;
use std::sync::Arc;

/// Terminal error stored in a [`Future`](crate::future::Future)
///
/// Errors raised by submitted work are always captured into the future and
/// never thrown synchronously from `submit`. A reader observes them either as
/// the return value of a blocking wait or via [`Future::error`](crate::future::Future::error).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The task was cancelled before it produced a result
    #[error("task was cancelled")]
    Cancelled,

    /// An isolated worker terminated without resolving its future
    #[error("worker exited before resolving its task")]
    WorkerLost,

    /// A value could not cross the isolated-worker boundary
    #[error("value could not cross the isolation boundary: {0}")]
    Serialization(String),

    /// The job panicked; the worker survived and keeps serving
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Application error raised by the submitted work
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
}

impl TaskError {
    /// Capture an application error as a task failure
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Failed(Arc::new(err.into()))
    }

    /// Capture a plain message as a task failure
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError::Failed(Arc::new(anyhow::anyhow!(message.into())))
    }
}

/// Error returned to the waiting side of [`Future::result`](crate::future::Future::result)
///
/// Timeouts apply to the waiter only: the deadline detaches the caller but
/// leaves the underlying work running unless it is explicitly cancelled.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WaitError {
    /// The deadline elapsed before the future reached a terminal state
    #[error("deadline elapsed before the task reached a terminal state")]
    Timeout,

    /// The stored error, re-raised to the waiter
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Attempted an invalid transition on an already-terminal future
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("future is already terminal ({0:?})")]
pub struct InvalidState(pub FutureState);

/// Submission was rejected because the executor is shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("executor has been shut down")]
pub struct ShutdownError;
