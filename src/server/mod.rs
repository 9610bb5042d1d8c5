//! WebSocket server: endpoint, connection tracking and lifecycle
//!
//! - [`websocket`]: upgrade endpoint, registry, fan-out and handlers
//! - [`lifecycle`]: [`WsServer`] start / readiness / stop
//! - [`shutdown`]: process exit hook

pub mod lifecycle;
pub mod shutdown;
pub mod websocket;

pub use lifecycle::WsServer;
pub use shutdown::{ExitTrigger, shutdown_signal, wait_for_exit_then_cleanup};
