//! # wshub
//!
//! An embeddable WebSocket fan-out server.
//!
//! ## Features
//!
//! - **Typed JSON envelopes**: every frame is `{"type": ..., "payload": ...}`
//! - **Pluggable handlers**: built-in `echo`, `broadcast` and `healthcheck`, plus your own
//! - **Safe fan-out**: one writer per connection, no write after close
//! - **Lifecycle control**: start, readiness probing and bounded graceful stop
//! - **Telemetry**: connection and message counters logged on shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wshub::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = WsServer::new(ServerConfig::from_port_and_path("8080/ws")?)?;
//!     server.start().await?;
//!     server.block_until_ready().await?;
//!
//!     wait_for_exit_then_cleanup(|| server.stop(), std::future::pending()).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod server;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Configuration ===
    pub use crate::config::{BuiltinHandler, OriginPolicy, ReadinessConfig, ServerConfig};

    // === Core ===
    pub use crate::core::{
        error::{CloseKind, ServerError, TransportError},
        telemetry::{Telemetry, TelemetrySnapshot},
        transport::FrameSink,
    };

    // === Server ===
    pub use crate::server::{
        ExitTrigger, WsServer, shutdown_signal, wait_for_exit_then_cleanup,
        websocket::{
            BroadcastReport, Broadcaster, ConnectionEntry, ConnectionStatus, DispatchOutcome,
            Envelope, HandlerRegistry, MessageHandler,
        },
    };

    // === External re-exports ===
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
