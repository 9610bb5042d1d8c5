//! WebSocket endpoint, connection registry and message fan-out
//!
//! # Architecture
//!
//! ```text
//! Client ──ws──▶ base_path ──▶ ws_handler() ──▶ ConnectionRegistry::add
//!                                   │
//!                              read loop ──▶ MessageRouter ──▶ MessageHandler
//!                                                                  │
//!                                        Broadcaster::send_to / broadcast
//!                                                                  │
//!                                  entry write lock ──▶ socket write half
//! ```
//!
//! # Protocol
//!
//! Client → Server and Server → Client (JSON):
//! - `{"type": "echo", "payload": ...}`
//! - `{"type": "broadcast", "payload": ...}`
//! - `{"type": "healthcheck"}`
//!
//! Unknown types are logged and dropped without a reply.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod router;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use connection::{ConnectionEntry, ConnectionStatus};
pub use handler::SessionContext;
pub use handlers::{HandlerRegistry, MessageHandler};
pub use protocol::Envelope;
pub use registry::ConnectionRegistry;
pub use router::{DispatchOutcome, MessageRouter};

use crate::config::ServerConfig;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Response body of the plain HTTP liveness endpoint
pub const HEALTH_RESPONSE: &str = "OK";

/// Build the HTTP router: the upgrade endpoint plus the optional health route
pub fn build_router(config: &ServerConfig, ctx: Arc<SessionContext>) -> Router {
    let mut router = Router::new().route(&config.base_path, get(handler::ws_handler));

    if let Some(health_path) = &config.health_path {
        router = router.route(health_path, get(|| async { HEALTH_RESPONSE }));
    }

    router.with_state(ctx).layer(TraceLayer::new_for_http())
}
