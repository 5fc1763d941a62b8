//! Registry of in-flight adapter and retrier sub-tasks.

use super::TaskId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// The chain a sub-task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubTaskKind {
    /// A request adapter evaluation.
    Adapter,
    /// A retrier evaluation.
    Retrier,
}

impl fmt::Display for SubTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter => f.write_str("adapter"),
            Self::Retrier => f.write_str("retrier"),
        }
    }
}

/// Information about an in-flight sub-task.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    /// The sub-task's id.
    pub task_id: TaskId,
    /// The logical request that spawned it.
    pub request_id: TaskId,
    /// Which chain it belongs to.
    pub kind: SubTaskKind,
    /// Name of the adapter or retrier.
    pub label: String,
    /// When it was registered.
    pub registered_at: DateTime<Utc>,
}

impl TaskEntry {
    /// Creates an entry registered now.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        request_id: TaskId,
        kind: SubTaskKind,
        label: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            request_id,
            kind,
            label: label.into(),
            registered_at: Utc::now(),
        }
    }
}

/// Thread-safe registry of in-flight sub-tasks.
///
/// Entries are removed when the [`TaskRegistration`] guard returned by
/// [`TaskRegistry::register`] is dropped, which covers success, failure and
/// cancellation alike.
#[derive(Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sub-task until the returned guard is dropped.
    #[must_use = "the task is deregistered as soon as the guard is dropped"]
    pub fn register(self: &Arc<Self>, entry: TaskEntry) -> TaskRegistration {
        let task_id = entry.task_id;
        trace!(task = %task_id, request = %entry.request_id, kind = %entry.kind, "Registering sub-task");
        self.entries.lock().insert(task_id, entry);
        TaskRegistration {
            registry: self.clone(),
            task_id,
        }
    }

    /// Removes a sub-task.
    pub fn deregister(&self, task_id: TaskId) -> Option<TaskEntry> {
        self.entries.lock().remove(&task_id)
    }

    /// Gets information about a sub-task.
    #[must_use]
    pub fn get(&self, task_id: TaskId) -> Option<TaskEntry> {
        self.entries.lock().get(&task_id).cloned()
    }

    /// Returns all in-flight sub-tasks of a request.
    #[must_use]
    pub fn entries_for(&self, request_id: TaskId) -> Vec<TaskEntry> {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Returns the number of in-flight sub-tasks of a request.
    #[must_use]
    pub fn count_for(&self, request_id: TaskId) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.request_id == request_id)
            .count()
    }

    /// Returns the number of in-flight sub-tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

/// Keeps a sub-task registered while alive.
#[derive(Debug)]
pub struct TaskRegistration {
    registry: Arc<TaskRegistry>,
    task_id: TaskId,
}

impl TaskRegistration {
    /// Returns the registered task id.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Drop for TaskRegistration {
    fn drop(&mut self) {
        if self.registry.deregister(self.task_id).is_some() {
            trace!(task = %self.task_id, "Deregistered sub-task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_deregisters_on_drop() {
        let registry = Arc::new(TaskRegistry::new());
        let request = TaskId::new();
        let task = TaskId::new();

        let guard = registry.register(TaskEntry::new(task, request, SubTaskKind::Adapter, "auth"));
        assert_eq!(registry.len(), 1);
        assert_eq!(guard.task_id(), task);
        assert_eq!(registry.get(task).map(|e| e.label), Some("auth".to_string()));

        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_counts_per_request() {
        let registry = Arc::new(TaskRegistry::new());
        let request = TaskId::new();
        let other = TaskId::new();

        let _a = registry.register(TaskEntry::new(TaskId::new(), request, SubTaskKind::Adapter, "a"));
        let _b = registry.register(TaskEntry::new(TaskId::new(), request, SubTaskKind::Retrier, "b"));
        let _c = registry.register(TaskEntry::new(TaskId::new(), other, SubTaskKind::Adapter, "c"));

        assert_eq!(registry.count_for(request), 2);
        assert_eq!(registry.entries_for(other).len(), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_explicit_deregister_then_drop() {
        let registry = Arc::new(TaskRegistry::new());
        let task = TaskId::new();
        let guard = registry.register(TaskEntry::new(task, TaskId::new(), SubTaskKind::Retrier, "r"));

        assert!(registry.deregister(task).is_some());
        drop(guard);
        assert!(registry.is_empty());
    }
}
