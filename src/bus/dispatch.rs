//! Handler dispatch keyed by `(topic, type)`.
//!
//! Several services share one topic and care about different variants.
//! Handlers register for the exact discriminator they consume; envelopes
//! whose type has no registration are a silent no-op. Each handler runs
//! inside the envelope's tenant scope.
//!
//! Delivery is at-least-once, so every registered handler must be
//! idempotent on `(transactionId, step)` for saga flows or on its natural
//! subject key otherwise.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error};

use super::{BusError, EventBus, EventHandler, Result};
use crate::envelope::Envelope;
use crate::tenant;

/// Result of processing one envelope through handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// All matching handlers succeeded.
    Success,
    /// No handler registered for the envelope's type.
    Ignored,
    /// One or more handlers failed, consider retry.
    HandlerFailed,
    /// Envelope could not be decoded, no retry will help.
    DecodeError,
}

impl DispatchResult {
    /// Returns true if the record should be committed.
    ///
    /// Decode errors are committed to prevent infinite redelivery of bad messages.
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::HandlerFailed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

type Handlers = Vec<(String, Arc<dyn EventHandler>)>;

/// Registry of handlers by topic and discriminator.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: HashMap<String, HashMap<String, Handlers>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for envelopes of `message_type` on `topic`.
    ///
    /// `name` identifies the handler in logs.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        message_type: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.routes
            .entry(topic.into())
            .or_default()
            .entry(message_type.into())
            .or_default()
            .push((name.into(), handler));
        self
    }

    /// Topics with at least one registration.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Dispatch an envelope to every handler registered for its type.
    ///
    /// Calls each handler in sequence, logging errors but continuing to
    /// subsequent handlers.
    pub async fn dispatch(&self, envelope: Arc<Envelope>) -> DispatchResult {
        let Some(handlers) = self
            .routes
            .get(&envelope.topic)
            .and_then(|by_type| by_type.get(&envelope.message_type))
        else {
            debug!(
                topic = %envelope.topic,
                message_type = %envelope.message_type,
                "No handler for type, ignoring"
            );
            return DispatchResult::Ignored;
        };

        let mut all_succeeded = true;
        for (name, handler) in handlers {
            let fut = handler.handle(Arc::clone(&envelope));
            if let Err(e) = tenant::scope(envelope.tenant.clone(), fut).await {
                error!(
                    handler = %name,
                    topic = %envelope.topic,
                    message_type = %envelope.message_type,
                    tenant_id = %envelope.tenant.id,
                    error = %e,
                    "Handler failed"
                );
                all_succeeded = false;
            }
        }

        if all_succeeded {
            DispatchResult::Success
        } else {
            DispatchResult::HandlerFailed
        }
    }

    /// Subscribe this registry to every topic it has registrations for.
    pub async fn attach(self: Arc<Self>, bus: &dyn EventBus) -> Result<()> {
        for topic in self.topics() {
            let dispatcher = Arc::new(TopicDispatcher {
                registry: Arc::clone(&self),
            });
            bus.subscribe(&topic, dispatcher).await?;
        }
        Ok(())
    }
}

struct TopicDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl EventHandler for TopicDispatcher {
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, Result<()>> {
        let registry = Arc::clone(&self.registry);
        Box::pin(async move {
            match registry.dispatch(envelope).await {
                DispatchResult::HandlerFailed => Err(BusError::handler(
                    "dispatch",
                    "one or more handlers failed",
                )),
                _ => Ok(()),
            }
        })
    }
}

struct FnHandler<F>(F);

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, Result<()>> {
        Box::pin((self.0)(envelope))
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::tenant::Tenant;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(topic: &str, message_type: &str) -> Arc<Envelope> {
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        Arc::new(Envelope::new(topic, 1, tenant, message_type, &json!({})).unwrap())
    }

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        handler_fn(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn failing() -> Arc<dyn EventHandler> {
        handler_fn(|_| async { Err(BusError::handler("test", "test failure")) })
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_type() {
        let logins = Arc::new(AtomicUsize::new(0));
        let logouts = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register("status", "LOGIN", "login", counting(Arc::clone(&logins)))
            .register("status", "LOGOUT", "logout", counting(Arc::clone(&logouts)));

        let result = registry.dispatch(envelope("status", "LOGIN")).await;

        assert_eq!(result, DispatchResult::Success);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_type_is_ignored() {
        let mut registry = HandlerRegistry::new();
        registry.register("status", "LOGIN", "login", failing());

        let result = registry.dispatch(envelope("status", "MAP_CHANGED")).await;

        assert_eq!(result, DispatchResult::Ignored);
        assert!(result.should_ack());
    }

    #[tokio::test]
    async fn test_failure_continues_remaining_handlers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register("status", "LOGIN", "a", failing())
            .register("status", "LOGIN", "b", counting(Arc::clone(&counter)));

        let result = registry.dispatch(envelope("status", "LOGIN")).await;

        assert_eq!(result, DispatchResult::HandlerFailed);
        assert!(!result.should_ack());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_runs_in_tenant_scope() {
        let seen = Arc::new(tokio::sync::Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new();
        registry.register(
            "status",
            "LOGIN",
            "scope",
            handler_fn(move |_| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    *seen.lock().await = tenant::current().ok();
                    Ok(())
                }
            }),
        );

        let env = envelope("status", "LOGIN");
        registry.dispatch(Arc::clone(&env)).await;

        assert_eq!(seen.lock().await.clone(), Some(env.tenant.clone()));
    }

    #[test]
    fn test_dispatch_result_should_ack() {
        assert!(DispatchResult::Success.should_ack());
        assert!(DispatchResult::Ignored.should_ack());
        assert!(DispatchResult::DecodeError.should_ack());
        assert!(!DispatchResult::HandlerFailed.should_ack());
    }
}
