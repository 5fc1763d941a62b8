//! Execution contexts that task completions can be marshalled onto.

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// A unit of work delivered to a [`Dispatcher`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that runs completion callbacks.
///
/// Use this when a continuation touches state that must only be mutated from
/// one place, such as a UI-owning thread draining a job channel.
pub trait Dispatcher: Send + Sync {
    /// Schedules `job` on this context.
    fn dispatch(&self, job: Job);
}

impl Dispatcher for Handle {
    fn dispatch(&self, job: Job) {
        self.spawn(async move { job() });
    }
}

impl Dispatcher for UnboundedSender<Job> {
    fn dispatch(&self, job: Job) {
        if self.send(job).is_err() {
            warn!("Dispatch queue closed, dropping completion");
        }
    }
}
