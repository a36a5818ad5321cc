//! Message handlers and the per-topic handler registry.

use crate::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Trait for processing decoded messages.
///
/// # Example
///
/// ```ignore
/// use messaging::{HandlerError, MessageHandler};
///
/// struct AuditHandler;
///
/// #[async_trait]
/// impl MessageHandler for AuditHandler {
///     async fn handle(&self, payload: serde_json::Value) -> Result<(), HandlerError> {
///         tracing::info!(%payload, "audit");
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "audit"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded JSON payload.
    async fn handle(&self, payload: Value) -> Result<(), HandlerError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<(), HandlerError> {
        (self.f)(payload).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Shorthand for a shared closure handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler::new(name, f))
}

/// Topic to handler mapping. At most one handler per topic; a later
/// registration replaces the earlier one.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`, returning the handler it replaced.
    pub fn insert(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = handlers.insert(topic.to_string(), handler);
        if let Some(previous) = &previous {
            warn!(
                topic,
                replaced = previous.name(),
                "Handler already registered for topic, replacing it"
            );
        }
        previous
    }

    /// Put back the state from before an `insert`.
    pub fn restore(&self, topic: &str, previous: Option<Arc<dyn MessageHandler>>) {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match previous {
            Some(handler) => {
                handlers.insert(topic.to_string(), handler);
            }
            None => {
                handlers.remove(topic);
            }
        }
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(topic).cloned())
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .handlers
            .read()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handler that accepts everything. Useful in tests.
pub struct NoOpHandler;

#[async_trait]
impl MessageHandler for NoOpHandler {
    async fn handle(&self, _payload: Value) -> Result<(), HandlerError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = handler_fn("echo", |payload: Value| async move {
            if payload["ok"] == json!(true) {
                Ok(())
            } else {
                Err(HandlerError::failed("not ok"))
            }
        });

        assert_eq!(handler.name(), "echo");
        assert!(handler.handle(json!({"ok": true})).await.is_ok());
        assert!(handler.handle(json!({"ok": false})).await.is_err());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        let first = handler_fn("first", |_| async { Ok(()) });
        let second = handler_fn("second", |_| async { Ok(()) });

        assert!(registry.insert("orders", first).is_none());
        let replaced = registry.insert("orders", second).unwrap();

        assert_eq!(replaced.name(), "first");
        assert_eq!(registry.get("orders").unwrap().name(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_restore() {
        let registry = HandlerRegistry::new();
        let first = handler_fn("first", |_| async { Ok(()) });
        registry.insert("orders", first);

        let previous = registry.insert("orders", Arc::new(NoOpHandler));
        registry.restore("orders", previous);
        assert_eq!(registry.get("orders").unwrap().name(), "first");

        let previous = registry.insert("payments", Arc::new(NoOpHandler));
        registry.restore("payments", previous);
        assert!(registry.get("payments").is_none());
        assert_eq!(registry.topics(), vec!["orders"]);
    }
}
