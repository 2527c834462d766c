//! Cooperative single-threaded scheduler
//!
//! One run loop drives suspendable task bodies to completion. Task bodies are
//! ordinary `async` blocks returning `Result<T, TaskError>`; suspension
//! occurs only at explicit await points, and cancellation is delivered as an
//! `Err(TaskError::Cancelled)` raised at the task's next suspension point.

mod scheduler;
pub(crate) mod task;
mod timer;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats};
pub use task::{Awaited, TaskHandle, TaskId, TaskState};
pub use timer::{Sleep, Timeout, YieldNow};
