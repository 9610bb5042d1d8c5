//! Registry of active connections
//!
//! The `ConnectionRegistry` is the single authoritative set of live
//! connections. Reads (broadcast snapshots, counting) share a `RwLock`;
//! structural changes (add/remove) take it exclusively and only briefly.
//!
//! # Removal
//!
//! ```text
//! remove(entry)
//!   ├─ Active → Draining          (atomic; a second remove is a no-op)
//!   ├─ lock entry writer          (waits for an in-flight write)
//!   ├─ close socket               (registry lock NOT held)
//!   └─ registry write lock
//!        ├─ Draining → Closed
//!        └─ delete from map
//! ```
//!
//! Once [`ConnectionRegistry::close_admission`] has been called, `add`
//! refuses new entries and closes them instead. The flag is checked under
//! the registry write lock, so a snapshot taken after closing admission
//! sees every entry that was ever admitted.
//!
//! Lock order is always entry writer → registry. Nothing holds the registry
//! lock while waiting on an entry writer, so removal cannot deadlock against
//! a broadcast.

use super::connection::ConnectionEntry;
use crate::core::telemetry::Telemetry;
use crate::core::transport::FrameSink;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Upper bound on how long closing a socket may hold its write lock
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// The set of active connections, owned by one server instance
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionEntry>>>,
    admitting: AtomicBool,
    telemetry: Arc<Telemetry>,
}

impl ConnectionRegistry {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            admitting: AtomicBool::new(true),
            telemetry,
        }
    }

    /// Insert a newly upgraded connection
    ///
    /// Returns `false` and closes the entry if admission is closed.
    pub async fn add(&self, entry: Arc<ConnectionEntry>) -> bool {
        let id = entry.id().to_string();
        {
            let mut connections = self.connections.write().await;
            if self.admitting.load(Ordering::SeqCst) {
                let previous = connections.insert(id.clone(), entry);
                debug_assert!(previous.is_none(), "duplicate connection id {id}");
                drop(connections);
                self.telemetry.record_connection_opened();
                tracing::debug!(connection_id = %id, "WebSocket client connected");
                return true;
            }
        }

        tracing::debug!(connection_id = %id, "Refusing connection, server is stopping");
        if entry.begin_drain() {
            let mut writer = entry.lock_writer().await;
            close_writer(&entry, &mut writer).await;
            entry.mark_closed();
        }
        false
    }

    /// Stop admitting new connections
    pub fn close_admission(&self) {
        self.admitting.store(false, Ordering::SeqCst);
    }

    /// Admit new connections again
    pub fn open_admission(&self) {
        self.admitting.store(true, Ordering::SeqCst);
    }

    /// Drain, close and evict a connection
    ///
    /// Returns `false` if the entry was already being removed, which makes
    /// concurrent removal from the read loop and from shutdown harmless.
    pub async fn remove(&self, entry: &Arc<ConnectionEntry>) -> bool {
        if !entry.begin_drain() {
            return false;
        }

        let mut writer = entry.lock_writer().await;
        close_writer(entry, &mut writer).await;

        {
            let mut connections = self.connections.write().await;
            entry.mark_closed();
            connections.remove(entry.id());
        }
        drop(writer);

        let lifetime = chrono::Utc::now() - entry.connected_at();
        tracing::debug!(
            connection_id = %entry.id(),
            lifetime_ms = lifetime.num_milliseconds(),
            "WebSocket client disconnected"
        );
        true
    }

    /// Point-in-time copy of the active entries
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionEntry>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Run `f` once per active entry, concurrently
    ///
    /// The registry lock is held only while the snapshot is taken, never
    /// while `f` runs.
    pub async fn for_each<F, Fut>(&self, f: F) -> Vec<Fut::Output>
    where
        F: FnMut(Arc<ConnectionEntry>) -> Fut,
        Fut: Future,
    {
        let snapshot = self.snapshot().await;
        join_all(snapshot.into_iter().map(f)).await
    }

    /// Look up an active entry by id
    pub async fn get(&self, connection_id: &str) -> Option<Arc<ConnectionEntry>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Number of active connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Close a socket, bounded by [`CLOSE_TIMEOUT`]
async fn close_writer(entry: &ConnectionEntry, writer: &mut Box<dyn FrameSink>) {
    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %entry.id(), error = %e, "Socket close failed");
        }
        Err(_) => {
            tracing::warn!(connection_id = %entry.id(), "Socket close timed out");
        }
    }
}
