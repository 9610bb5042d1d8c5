//! Outbound delivery: single-connection replies and fan-out broadcast
//!
//! # Architecture
//!
//! ```text
//! broadcast(type, payload)
//!        │ encode once
//!        ▼
//! ConnectionRegistry::for_each ──snapshot──▶ spawn per entry
//!                                                 │
//!                                        entry.send_text()   (entry write lock)
//!                                                 │
//!                                   ok ──▶ messages_sent += 1
//!                                  err ──▶ log, continue
//! ```
//!
//! Each target gets its own task, so one slow peer delays only itself.
//! Per-peer order across concurrent broadcasts is the order in which they
//! win that peer's write lock.

use super::connection::ConnectionEntry;
use super::protocol::Envelope;
use super::registry::ConnectionRegistry;
use crate::core::error::TransportError;
use crate::core::telemetry::Telemetry;
use serde_json::Value;
use std::sync::Arc;

/// Result of one broadcast call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Entries in the snapshot, i.e. writes attempted
    pub attempted: usize,
    /// Writes that succeeded
    pub delivered: usize,
}

impl BroadcastReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Delivery handle shared by every handler
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    telemetry: Arc<Telemetry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Write one envelope to a single connection
    pub async fn send_to(
        &self,
        entry: &ConnectionEntry,
        message_type: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        let text = Envelope::new(message_type, payload).encode()?;
        entry.send_text(text).await?;
        self.telemetry.record_message_sent();
        Ok(())
    }

    /// Write one envelope to every active connection
    ///
    /// Per-connection failures are logged and counted in the report, never
    /// returned; only an envelope that cannot be encoded fails the call.
    pub async fn broadcast(
        &self,
        message_type: &str,
        payload: Value,
    ) -> Result<BroadcastReport, TransportError> {
        let text = Envelope::new(message_type, payload).encode()?;

        let outcomes = self
            .registry
            .for_each(|entry| {
                let text = text.clone();
                let telemetry = self.telemetry.clone();
                tokio::spawn(async move {
                    match entry.send_text(text).await {
                        Ok(()) => {
                            telemetry.record_message_sent();
                            true
                        }
                        Err(TransportError::Closed) => {
                            tracing::debug!(
                                connection_id = %entry.id(),
                                "Skipping broadcast to closed connection"
                            );
                            false
                        }
                        Err(e) => {
                            tracing::warn!(
                                connection_id = %entry.id(),
                                error = %e,
                                "Failed to broadcast message to a client"
                            );
                            false
                        }
                    }
                })
            })
            .await;

        let mut report = BroadcastReport {
            attempted: outcomes.len(),
            delivered: 0,
        };
        for outcome in outcomes {
            match outcome {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Broadcast write task failed"),
            }
        }

        tracing::debug!(
            message_type = %message_type,
            attempted = report.attempted,
            delivered = report.delivered,
            "Broadcast complete"
        );
        Ok(report)
    }
}
