//! Per-request redirect handler registry.

use super::RedirectHandler;
use crate::task::TaskId;
use dashmap::DashMap;
use std::sync::Arc;

/// Redirect handlers keyed by the logical request that registered them.
#[derive(Default)]
pub struct RedirectRegistry {
    handlers: DashMap<TaskId, Arc<dyn RedirectHandler>>,
}

impl RedirectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `task_id` until the returned guard is dropped.
    #[must_use = "the handler is removed as soon as the guard is dropped"]
    pub fn register(self: &Arc<Self>, task_id: TaskId, handler: Arc<dyn RedirectHandler>) -> RedirectRegistration {
        self.handlers.insert(task_id, handler);
        RedirectRegistration {
            registry: Arc::downgrade(self),
            task_id,
        }
    }

    /// Returns the handler registered for `task_id`.
    #[must_use]
    pub fn handler(&self, task_id: TaskId) -> Option<Arc<dyn RedirectHandler>> {
        self.handlers.get(&task_id).map(|entry| entry.value().clone())
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for RedirectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Removes a redirect handler when dropped.
#[derive(Debug)]
pub struct RedirectRegistration {
    registry: std::sync::Weak<RedirectRegistry>,
    task_id: TaskId,
}

impl Drop for RedirectRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.remove(&self.task_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use reqwest::Request;

    #[test]
    fn test_registration_guard_removes_handler() {
        let registry = Arc::new(RedirectRegistry::new());
        let task_id = TaskId::new();
        {
            let _guard = registry.register(task_id, Arc::new(|_: &HttpResponse, next: Request| Some(next)));
            assert!(registry.handler(task_id).is_some());
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.handler(task_id).is_none());
        assert!(registry.is_empty());
    }
}
