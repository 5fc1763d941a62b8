//! Cancellable single-resolution task with chaining.

use super::{CancellationToken, Dispatcher};
use crate::errors::PipelineError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Result type produced by every [`AsyncTask`].
pub type TaskResult<T> = Result<T, PipelineError>;

/// Identity of a task, independent of what it computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new, time-ordered task id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cancel handle of an [`AsyncTask::new`] task, cleared once the task settles.
#[derive(Default)]
struct CancelSlot {
    settled: bool,
    handle: Option<CancelHandle>,
}

impl CancelSlot {
    fn settle(&mut self) {
        self.settled = true;
        self.handle = None;
    }
}

/// Single-shot completion callback handed to an [`AsyncTask::new`] work function.
pub struct Completer<T> {
    tx: oneshot::Sender<TaskResult<T>>,
    slot: Arc<Mutex<CancelSlot>>,
}

impl<T> Completer<T> {
    /// Settles the task. Results delivered after the task was dropped are discarded.
    pub fn complete(self, result: TaskResult<T>) {
        self.slot.lock().settle();
        let _ = self.tx.send(result);
    }

    /// Settles the task with a value.
    pub fn resolve(self, value: T) {
        self.complete(Ok(value));
    }

    /// Settles the task with an error.
    pub fn reject(self, error: PipelineError) {
        self.complete(Err(error));
    }

    /// Returns true if nobody is waiting for the result anymore.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Stops the work behind an [`AsyncTask::new`] task when the task is cancelled.
pub struct CancelHandle(Box<dyn FnOnce() + Send>);

impl CancelHandle {
    /// Wraps a cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(cancel))
    }
}

/// Cancels a task without owning it.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    token: Arc<CancellationToken>,
}

impl TaskHandle {
    /// Returns the task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Cancels the task. The completion callback will not fire afterwards.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns true if the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Cancels a task if dropped before being disarmed, so abandoning an
/// awaited sub-task also stops its work.
pub(crate) struct CancelGuard(Option<TaskHandle>);

impl CancelGuard {
    pub(crate) const fn new(handle: TaskHandle) -> Self {
        Self(Some(handle))
    }

    pub(crate) fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.cancel("parent request abandoned");
        }
    }
}

/// A cancellable unit of work that settles exactly once.
///
/// Tasks are lazy: nothing runs until the task is awaited or handed to
/// [`AsyncTask::resolve`]. The exception is [`AsyncTask::new`], whose work
/// function runs at construction like a promise executor.
///
/// Derived tasks (`then`, `and_then`, ...) share the cancellation token of
/// the task they came from, so cancelling the end of a chain cancels
/// whichever step is active.
pub struct AsyncTask<T> {
    id: TaskId,
    future: BoxFuture<'static, TaskResult<T>>,
    token: Arc<CancellationToken>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

fn guarded<T, F>(token: Arc<CancellationToken>, fut: F) -> BoxFuture<'static, TaskResult<T>>
where
    T: Send + 'static,
    F: Future<Output = TaskResult<T>> + Send + 'static,
{
    async move {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(PipelineError::cancelled(token.reason())),
            result = fut => result,
        }
    }
    .boxed()
}

impl<T: Send + 'static> AsyncTask<T> {
    /// Creates a task from a future.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self::assemble(TaskId::new(), Arc::new(CancellationToken::new()), None, fut)
    }

    pub(crate) fn from_future_with_id<F>(id: TaskId, fut: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self::assemble(id, Arc::new(CancellationToken::new()), None, fut)
    }

    /// Creates a task that resolves immediately with `value`.
    pub fn ready(value: T) -> Self {
        Self::from_future(async move { Ok(value) })
    }

    /// Creates a task that fails immediately with `error`.
    pub fn failed(error: PipelineError) -> Self {
        Self::from_future(async move { Err(error) })
    }

    /// Creates a task from a callback-style work function.
    ///
    /// `work` runs immediately with a single-shot [`Completer`]. It may return
    /// a [`CancelHandle`], which is invoked if the task is cancelled before it
    /// settles and never afterwards.
    pub fn new<W>(work: W) -> Self
    where
        W: FnOnce(Completer<T>) -> Option<CancelHandle>,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(CancelSlot::default()));
        let settled = slot.clone();
        let task = Self::from_future(async move {
            let result = rx.await.unwrap_or_else(|_| {
                Err(PipelineError::Internal(
                    "task completer dropped without a result".to_string(),
                ))
            });
            settled.lock().settle();
            result
        });

        let completer = Completer {
            tx,
            slot: slot.clone(),
        };
        if let Some(handle) = work(completer) {
            {
                let mut guard = slot.lock();
                if !guard.settled {
                    guard.handle = Some(handle);
                }
            }
            task.token.on_cancel(move |_| {
                let handle = slot.lock().handle.take();
                if let Some(handle) = handle {
                    (handle.0)();
                }
            });
        }
        task
    }

    fn assemble<F>(
        id: TaskId,
        token: Arc<CancellationToken>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
        fut: F,
    ) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self {
            id,
            future: guarded(token.clone(), fut),
            token,
            dispatcher,
        }
    }

    /// Returns the task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns a handle that can cancel this task.
    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            token: self.token.clone(),
        }
    }

    /// Cancels the task.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns true if the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Transforms the value, propagating errors.
    pub fn then<U, F>(self, f: F) -> AsyncTask<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let Self {
            id,
            future,
            token,
            dispatcher,
        } = self;
        AsyncTask::assemble(id, token, dispatcher, async move { future.await.map(f) })
    }

    /// Chains another task on success.
    ///
    /// Cancelling the chained task also cancels the task produced by `f`.
    pub fn and_then<U, F>(self, f: F) -> AsyncTask<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> AsyncTask<U> + Send + 'static,
    {
        let Self {
            id,
            future,
            token,
            dispatcher,
        } = self;
        let parent = token.clone();
        AsyncTask::assemble(id, token, dispatcher, async move {
            let value = future.await?;
            let next = f(value);
            let child = next.token.clone();
            parent.on_cancel(move |reason| child.cancel(reason));
            next.await
        })
    }

    /// Transforms the error, propagating values.
    pub fn map_err<F>(self, f: F) -> Self
    where
        F: FnOnce(PipelineError) -> PipelineError + Send + 'static,
    {
        let Self {
            id,
            future,
            token,
            dispatcher,
        } = self;
        Self::assemble(id, token, dispatcher, async move { future.await.map_err(f) })
    }

    /// Runs a side effect on failure without touching the success path.
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: FnOnce(&PipelineError) + Send + 'static,
    {
        let Self {
            id,
            future,
            token,
            dispatcher,
        } = self;
        Self::assemble(id, token, dispatcher, async move {
            let result = future.await;
            if let Err(ref err) = result {
                f(err);
            }
            result
        })
    }

    /// Runs a side effect on success.
    pub fn finally<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let Self {
            id,
            future,
            token,
            dispatcher,
        } = self;
        Self::assemble(id, token, dispatcher, async move {
            let result = future.await;
            if let Ok(ref value) = result {
                f(value);
            }
            result
        })
    }

    /// Delivers the completion of [`AsyncTask::resolve`] on `dispatcher`.
    ///
    /// Awaiting the task directly always completes on the awaiting context.
    #[must_use]
    pub fn dispatch<D>(mut self, dispatcher: D) -> Self
    where
        D: Dispatcher + 'static,
    {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Drives the task in the background and hands the result to `on_complete`.
    ///
    /// `on_complete` runs at most once, and never after the task has been
    /// cancelled. Must be called from within a tokio runtime.
    pub fn resolve<F>(self, on_complete: F) -> TaskHandle
    where
        F: FnOnce(TaskResult<T>) + Send + 'static,
    {
        let handle = self.handle();
        let token = self.token.clone();
        let dispatcher = self.dispatcher.clone();
        let id = self.id;

        tokio::spawn(async move {
            let result = self.await;
            if token.is_cancelled() {
                debug!(task = %id, "Task cancelled, completion suppressed");
                return;
            }
            match dispatcher {
                Some(dispatcher) => dispatcher.dispatch(Box::new(move || {
                    if !token.is_cancelled() {
                        on_complete(result);
                    }
                })),
                None => on_complete(result),
            }
        });

        handle
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for AsyncTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .field("dispatched", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}
