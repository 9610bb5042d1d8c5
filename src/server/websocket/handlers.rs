//! Message handlers and the handler registry
//!
//! A handler receives the connection a message arrived on and the
//! envelope's payload. The registry maps message types to handlers; it is
//! filled once while the server is configured and never changes after the
//! server owns it, so lookups need no locking.

use super::broadcast::Broadcaster;
use super::connection::ConnectionEntry;
use super::protocol::{BROADCAST, ECHO, HEALTH_CHECK, HEALTH_CHECK_REPLY};
use crate::config::BuiltinHandler;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles one message type
///
/// Handlers are expected to log and return on bad input rather than fail;
/// a handler that panics only loses the message it was handling.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, hub: &Broadcaster, conn: &Arc<ConnectionEntry>, payload: Value);
}

/// Message type → handler
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the given built-in handlers
    pub fn with_builtins(enabled: &[BuiltinHandler]) -> Self {
        let mut registry = Self::new();
        for builtin in enabled {
            let handler: Arc<dyn MessageHandler> = match builtin {
                BuiltinHandler::Echo => Arc::new(EchoHandler),
                BuiltinHandler::Broadcast => Arc::new(BroadcastHandler),
                BuiltinHandler::HealthCheck => Arc::new(HealthCheckHandler),
            };
            registry.register(builtin.message_type(), handler);
        }
        registry
    }

    /// Register `handler` for `message_type`, replacing any previous one
    pub fn register(
        &mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> &mut Self {
        let message_type = message_type.into();
        if self.handlers.insert(message_type.clone(), handler).is_some() {
            tracing::warn!(message_type = %message_type, "Replacing existing message handler");
        }
        self
    }

    /// Add every handler from `other`; `other` wins on collisions
    pub fn extend(&mut self, other: HandlerRegistry) {
        for (message_type, handler) in other.handlers {
            self.register(message_type, handler);
        }
    }

    pub fn get(&self, message_type: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(message_type)
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    /// Registered message types, sorted
    pub fn message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Replies to the sender with the same payload
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, hub: &Broadcaster, conn: &Arc<ConnectionEntry>, payload: Value) {
        if let Err(e) = hub.send_to(conn, ECHO, payload).await {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Failed to send echo message");
        }
    }
}

/// Forwards the payload to every active connection, sender included
pub struct BroadcastHandler;

#[async_trait]
impl MessageHandler for BroadcastHandler {
    async fn handle(&self, hub: &Broadcaster, conn: &Arc<ConnectionEntry>, payload: Value) {
        if let Err(e) = hub.broadcast(BROADCAST, payload).await {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Failed to broadcast message");
        }
    }
}

/// Replies to the sender with a fixed acknowledgment
pub struct HealthCheckHandler;

#[async_trait]
impl MessageHandler for HealthCheckHandler {
    async fn handle(&self, hub: &Broadcaster, conn: &Arc<ConnectionEntry>, _payload: Value) {
        let reply = Value::String(HEALTH_CHECK_REPLY.to_string());
        if let Err(e) = hub.send_to(conn, HEALTH_CHECK, reply).await {
            tracing::warn!(
                connection_id = %conn.id(),
                error = %e,
                "Failed to send healthcheck response"
            );
        }
    }
}
