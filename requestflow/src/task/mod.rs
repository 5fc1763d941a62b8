//! Cooperative task lifecycle: the promise primitive, cancellation,
//! dispatch queues and the sub-task registry.
//!
//! This module provides:
//! - AsyncTask, a cancellable single-resolution future with chaining
//! - CancellationToken for cooperative cancellation
//! - Dispatcher for marshalling completions onto an execution context
//! - TaskRegistry for tracking in-flight adapter and retrier sub-tasks

mod async_task;
mod dispatch;
mod registry;
mod token;

pub use async_task::{AsyncTask, CancelHandle, Completer, TaskHandle, TaskId, TaskResult};
pub(crate) use async_task::CancelGuard;
pub use dispatch::{Dispatcher, Job};
pub use registry::{SubTaskKind, TaskEntry, TaskRegistration, TaskRegistry};
pub use token::{CancelCallback, CancellationToken};
