//! Synchronization primitives shared by both scheduling models

mod semaphore;

pub use semaphore::{AcquireCoop, Semaphore, SemaphoreGuard};
