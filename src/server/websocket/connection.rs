//! A single live connection as seen by the registry
//!
//! Each entry pairs the connection's write half with the lock that
//! serializes every outbound write (echo, broadcast, handler replies) and a
//! status that only moves forward: `Active → Draining → Closed`.

use crate::core::error::TransportError;
use crate::core::transport::FrameSink;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Lifecycle status of a connection entry
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Accepting writes
    Active = 0,
    /// Removal has started; waiting for an in-flight write to finish
    Draining = 1,
    /// Socket closed and entry evicted
    Closed = 2,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Active,
            1 => ConnectionStatus::Draining,
            _ => ConnectionStatus::Closed,
        }
    }
}

/// Registry-held record for one connection
pub struct ConnectionEntry {
    id: String,
    connected_at: DateTime<Utc>,
    status: AtomicU8,
    writer: Mutex<Box<dyn FrameSink>>,
}

impl ConnectionEntry {
    /// Wrap a freshly upgraded connection's write half
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            id: format!("conn_{}", Uuid::new_v4().simple()),
            connected_at: Utc::now(),
            status: AtomicU8::new(ConnectionStatus::Active as u8),
            writer: Mutex::new(sink),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Write one text frame under the entry's write lock
    ///
    /// A closed entry refuses the write without touching the socket. The
    /// status is checked after the lock is taken, and the closing side flips
    /// it while holding the same lock, so a write can never land after close.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        if self.status() == ConnectionStatus::Closed {
            return Err(TransportError::Closed);
        }
        writer.send_text(text).await
    }

    /// `Active → Draining`; false if removal already started elsewhere
    pub(crate) fn begin_drain(&self) -> bool {
        self.status
            .compare_exchange(
                ConnectionStatus::Active as u8,
                ConnectionStatus::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Take the write lock, waiting out any write in progress
    pub(crate) async fn lock_writer(&self) -> MutexGuard<'_, Box<dyn FrameSink>> {
        self.writer.lock().await
    }

    /// Must be called while holding the guard from [`lock_writer`](Self::lock_writer)
    pub(crate) fn mark_closed(&self) {
        self.status
            .store(ConnectionStatus::Closed as u8, Ordering::Release);
    }
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("status", &self.status())
            .finish()
    }
}
