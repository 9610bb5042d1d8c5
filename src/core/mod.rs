//! Core types shared by the server: errors, telemetry and the frame sink seam

pub mod error;
pub mod telemetry;
pub mod transport;

pub use error::{CloseKind, ServerError, TransportError};
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use transport::FrameSink;
