//! # Handler Registry
//!
//! In-memory mapping from a task's type tag to the executable body that
//! processes it. Tags are normalized to lowercase on registration and on
//! lookup, so submitters may use any casing. The registry is populated once
//! at worker startup and is read-only afterwards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{QueueError, Result};

/// An executable task body. Implementations must be idempotent: a task may
/// be executed more than once if its holder crashes and the lease expires.
#[async_trait]
pub trait TaskHandler: Send + Sync + std::fmt::Debug {
    /// The type tag this handler serves.
    fn task_type(&self) -> &str;

    /// Run the task. Returning an error feeds the retry pipeline.
    async fn execute(&self, payload: &serde_json::Value) -> Result<()>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its lowercased type tag.
    pub fn register(&self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let task_type = handler.task_type().to_lowercase();

        let mut handlers = self.handlers.write().map_err(|_| {
            QueueError::ExecutionError("failed to acquire registry write lock".to_string())
        })?;

        if handlers.contains_key(&task_type) {
            warn!(task_type = %task_type, "handler already registered, replacing");
        }
        handlers.insert(task_type.clone(), handler);
        info!(task_type = %task_type, "registered task handler");

        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, task_type: &str) -> Result<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read().map_err(|_| {
            QueueError::ExecutionError("failed to acquire registry read lock".to_string())
        })?;

        handlers
            .get(&task_type.to_lowercase())
            .cloned()
            .ok_or_else(|| QueueError::HandlerNotFound(task_type.to_string()))
    }

    pub fn has(&self, task_type: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&task_type.to_lowercase()))
            .unwrap_or(false)
    }

    /// All registered type tags, for startup logging.
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers
            .read()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        fn task_type(&self) -> &str {
            "NOOP"
        }

        async fn execute(&self, _payload: &serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler)).unwrap();

        assert!(registry.get("noop").is_ok());
        assert!(registry.get("NOOP").is_ok());
        assert!(registry.get("NoOp").is_ok());
        assert!(registry.has("Noop"));
        assert_eq!(registry.registered_types(), vec!["noop".to_string()]);
    }

    #[test]
    fn unknown_type_yields_handler_not_found() {
        let registry = HandlerRegistry::new();
        let err = registry.get("missing").unwrap_err();
        assert_eq!(err, QueueError::HandlerNotFound("missing".to_string()));
    }
}
