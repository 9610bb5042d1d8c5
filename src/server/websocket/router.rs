//! Routing of inbound frames to handlers

use super::broadcast::Broadcaster;
use super::connection::ConnectionEntry;
use super::handlers::HandlerRegistry;
use super::protocol::Envelope;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion
    Handled,
    /// The frame was not a valid envelope and was dropped
    Malformed,
    /// No handler is registered for this type
    Unsupported(String),
    /// The handler panicked; the message was dropped
    HandlerFailed(String),
}

/// Decodes frames and invokes the registered handler
#[derive(Clone)]
pub struct MessageRouter {
    handlers: Arc<HandlerRegistry>,
    hub: Broadcaster,
}

impl MessageRouter {
    pub fn new(handlers: Arc<HandlerRegistry>, hub: Broadcaster) -> Self {
        Self { handlers, hub }
    }

    pub fn hub(&self) -> &Broadcaster {
        &self.hub
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Route one frame received on `conn`
    ///
    /// Nothing here is fatal to the connection: bad frames, unknown types
    /// and panicking handlers are logged and the read loop carries on.
    pub async fn dispatch(&self, conn: &Arc<ConnectionEntry>, frame: &[u8]) -> DispatchOutcome {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Failed to parse message");
                return DispatchOutcome::Malformed;
            }
        };

        let Some(handler) = self.handlers.get(&envelope.message_type) else {
            tracing::info!(
                connection_id = %conn.id(),
                message_type = %envelope.message_type,
                "Unsupported message type"
            );
            return DispatchOutcome::Unsupported(envelope.message_type);
        };

        let result = AssertUnwindSafe(handler.handle(&self.hub, conn, envelope.payload))
            .catch_unwind()
            .await;

        match result {
            Ok(()) => DispatchOutcome::Handled,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    connection_id = %conn.id(),
                    message_type = %envelope.message_type,
                    reason = %reason,
                    "Message handler panicked; message dropped"
                );
                DispatchOutcome::HandlerFailed(envelope.message_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::connection::testing::*;
    use super::super::handlers::MessageHandler;
    use super::super::registry::ConnectionRegistry;
    use super::*;
    use crate::config::BuiltinHandler;
    use crate::core::telemetry::Telemetry;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Explodes;

    #[async_trait]
    impl MessageHandler for Explodes {
        async fn handle(&self, _: &Broadcaster, _: &Arc<ConnectionEntry>, _: Value) {
            panic!("payload had the wrong shape");
        }
    }

    fn router() -> MessageRouter {
        let telemetry = Arc::new(Telemetry::new());
        let hub = Broadcaster::new(Arc::new(ConnectionRegistry::new(telemetry.clone())), telemetry);
        let mut handlers = HandlerRegistry::with_builtins(&BuiltinHandler::all());
        handlers.register("explode", Arc::new(Explodes));
        MessageRouter::new(Arc::new(handlers), hub)
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let router = router();
        let (conn, probe) = recording_entry();

        let outcome = router
            .dispatch(&conn, br#"{"type":"echo","payload":"ping"}"#)
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(probe.frames(), vec![r#"{"type":"echo","payload":"ping"}"#]);
    }

    #[tokio::test]
    async fn test_non_json_is_malformed() {
        let router = router();
        let (conn, probe) = recording_entry();

        assert_eq!(router.dispatch(&conn, b"not json").await, DispatchOutcome::Malformed);
        assert!(probe.frames().is_empty());
    }

    #[tokio::test]
    async fn test_array_frame_is_malformed() {
        let router = router();
        let (conn, probe) = recording_entry();

        let outcome = router.dispatch(&conn, br#"["echo","x"]"#).await;

        assert_eq!(outcome, DispatchOutcome::Malformed);
        assert!(probe.frames().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_is_dropped_without_reply() {
        let router = router();
        let (conn, probe) = recording_entry();

        let outcome = router.dispatch(&conn, br#"{"type":"nope","payload":1}"#).await;

        assert_eq!(outcome, DispatchOutcome::Unsupported("nope".to_string()));
        assert!(probe.frames().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let router = router();
        let (conn, probe) = recording_entry();

        let outcome = router.dispatch(&conn, br#"{"type":"explode"}"#).await;
        assert_eq!(outcome, DispatchOutcome::HandlerFailed("explode".to_string()));

        // The router keeps working for the same connection
        let outcome = router.dispatch(&conn, br#"{"type":"healthcheck"}"#).await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(probe.frames().len(), 1);
    }
}
