//! Process-wide connection and message counters
//!
//! Counters are plain atomics: they only ever go up while the process runs,
//! and nothing reads them in a way that needs a consistent cut across all
//! three, so `Relaxed` ordering is enough.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by the registry, dispatcher and broadcaster
#[derive(Debug, Default)]
pub struct Telemetry {
    connections_opened: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub connections_opened: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }

    /// Emit the current counters as a single info event
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            connections_opened = snapshot.connections_opened,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            "Final telemetry"
        );
    }
}

impl TelemetrySnapshot {
    /// Counter-wise difference against an earlier snapshot, floored at zero
    pub fn since(&self, earlier: &TelemetrySnapshot) -> TelemetrySnapshot {
        TelemetrySnapshot {
            connections_opened: self.connections_opened.saturating_sub(earlier.connections_opened),
            messages_sent: self.messages_sent.saturating_sub(earlier.messages_sent),
            messages_received: self.messages_received.saturating_sub(earlier.messages_received),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.snapshot(), TelemetrySnapshot::default());
    }

    #[test]
    fn test_counters_are_independent() {
        let telemetry = Telemetry::new();
        telemetry.record_connection_opened();
        telemetry.record_message_sent();
        telemetry.record_message_sent();
        telemetry.record_message_received();

        let snap = telemetry.snapshot();
        assert_eq!(snap.connections_opened, 1);
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.messages_received, 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let telemetry = Arc::new(Telemetry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let t = telemetry.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        t.record_message_sent();
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(telemetry.snapshot().messages_sent, 8000);
    }

    #[test]
    fn test_snapshot_since() {
        let telemetry = Telemetry::new();
        telemetry.record_message_received();
        let before = telemetry.snapshot();
        telemetry.record_message_received();
        telemetry.record_message_sent();

        let delta = telemetry.snapshot().since(&before);
        assert_eq!(delta.messages_received, 1);
        assert_eq!(delta.messages_sent, 1);
        assert_eq!(delta.connections_opened, 0);
    }

    #[test]
    fn test_since_with_swapped_arguments_floors_at_zero() {
        let telemetry = Telemetry::new();
        let before = telemetry.snapshot();
        telemetry.record_message_sent();
        telemetry.record_connection_opened();

        let delta = before.since(&telemetry.snapshot());
        assert_eq!(delta, TelemetrySnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let telemetry = Telemetry::new();
        telemetry.record_connection_opened();
        let json = serde_json::to_value(telemetry.snapshot()).unwrap();
        assert_eq!(json["connections_opened"], 1);
        assert_eq!(json["messages_sent"], 0);
    }
}
