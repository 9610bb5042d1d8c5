//! WebSocket upgrade handler and per-connection read loop
//!
//! Each accepted connection gets:
//!
//! 1. An origin check against the configured policy
//! 2. A registry entry owning the write half
//! 3. A read loop that feeds every frame to the [`MessageRouter`]
//! 4. Removal from the registry on every exit path

use super::connection::ConnectionEntry;
use super::router::MessageRouter;
use crate::config::OriginPolicy;
use crate::core::error::CloseKind;
use crate::core::transport::{classify_close_frame, classify_read_error};
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;

/// State shared by every connection of one server
pub struct SessionContext {
    pub router: MessageRouter,
    pub origin_policy: OriginPolicy,
}

/// Axum handler for the upgrade endpoint
pub async fn ws_handler(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Failed to upgrade connection");
            return rejection.into_response();
        }
    };

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if !ctx.origin_policy.allows(origin, host) {
        tracing::warn!(
            origin = origin.unwrap_or_default(),
            host = host.unwrap_or_default(),
            "Rejected WebSocket upgrade from disallowed origin"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Register an upgraded socket and run its read loop
async fn handle_socket(socket: WebSocket, ctx: Arc<SessionContext>) {
    let (sink, stream) = socket.split();
    let entry = Arc::new(ConnectionEntry::new(Box::new(sink)));

    if !ctx.router.hub().registry().add(entry.clone()).await {
        return;
    }
    tracing::info!(connection_id = %entry.id(), "Successfully upgraded connection");

    run_session(entry, stream, &ctx.router).await;
}

/// Read frames until the connection ends, then remove it
///
/// The entry is removed on every exit path. Normal exits remove it inline;
/// if the task is dropped mid-loop, the guard spawns the removal instead.
pub async fn run_session<S>(entry: Arc<ConnectionEntry>, mut stream: S, router: &MessageRouter)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut guard = RemovalGuard::new(entry.clone(), router.clone());
    let telemetry = router.hub().telemetry();

    let close_kind = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                telemetry.record_message_received();
                router.dispatch(&entry, text.as_str().as_bytes()).await;
            }
            Some(Ok(Message::Binary(bytes))) => {
                telemetry.record_message_received();
                router.dispatch(&entry, &bytes).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // axum answers pings itself
            }
            Some(Ok(Message::Close(frame))) => {
                break classify_close_frame(frame.as_ref());
            }
            Some(Err(e)) => {
                let kind = classify_read_error(&e);
                if !kind.is_expected() {
                    tracing::warn!(connection_id = %entry.id(), error = %e, "Unexpected close error");
                }
                break kind;
            }
            None => break CloseKind::Expected,
        }
    };

    match close_kind {
        CloseKind::Expected => {
            tracing::info!(connection_id = %entry.id(), "Connection closed by peer")
        }
        CloseKind::Unexpected => {
            tracing::warn!(connection_id = %entry.id(), "Connection closed unexpectedly")
        }
    }

    guard.disarm();
    router.hub().registry().remove(&entry).await;
}

/// Removes the entry if the session is dropped before its normal teardown
struct RemovalGuard {
    entry: Arc<ConnectionEntry>,
    router: MessageRouter,
    armed: bool,
}

impl RemovalGuard {
    fn new(entry: Arc<ConnectionEntry>, router: MessageRouter) -> Self {
        Self {
            entry,
            router,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(connection_id = %self.entry.id(), "No runtime left to remove connection");
            return;
        };
        let entry = self.entry.clone();
        let registry = self.router.hub().registry().clone();
        runtime.spawn(async move {
            registry.remove(&entry).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::broadcast::Broadcaster;
    use super::super::connection::ConnectionStatus;
    use super::super::connection::testing::*;
    use super::super::handlers::HandlerRegistry;
    use super::super::registry::ConnectionRegistry;
    use super::*;
    use crate::config::BuiltinHandler;
    use crate::core::telemetry::Telemetry;
    use axum::extract::ws::CloseFrame;
    use futures::stream;
    use std::time::Duration;

    fn router() -> MessageRouter {
        let telemetry = Arc::new(Telemetry::new());
        let hub = Broadcaster::new(Arc::new(ConnectionRegistry::new(telemetry.clone())), telemetry);
        MessageRouter::new(
            Arc::new(HandlerRegistry::with_builtins(&BuiltinHandler::all())),
            hub,
        )
    }

    fn text(s: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(s.to_string().into()))
    }

    #[tokio::test]
    async fn test_session_dispatches_then_removes() {
        let router = router();
        let (entry, probe) = recording_entry();
        router.hub().registry().add(entry.clone()).await;

        let frames = stream::iter(vec![
            text(r#"{"type":"echo","payload":"one"}"#),
            text("garbage"),
            text(r#"{"type":"echo","payload":"two"}"#),
        ]);
        run_session(entry.clone(), frames, &router).await;

        assert_eq!(probe.frames().len(), 2);
        let counters = router.hub().telemetry().snapshot();
        assert_eq!(counters.messages_received, 3);
        assert_eq!(counters.messages_sent, 2);
        assert_eq!(entry.status(), ConnectionStatus::Closed);
        assert!(router.hub().registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_binary_frames_are_routed() {
        let router = router();
        let (entry, probe) = recording_entry();
        router.hub().registry().add(entry.clone()).await;

        let frames = stream::iter(vec![Ok(Message::Binary(
            br#"{"type":"healthcheck"}"#.to_vec().into(),
        ))]);
        run_session(entry, frames, &router).await;

        assert_eq!(probe.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_close_frame_stops_reading() {
        let router = router();
        let (entry, probe) = recording_entry();
        router.hub().registry().add(entry.clone()).await;

        let frames = stream::iter(vec![
            Ok(Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: "bye".into(),
            }))),
            text(r#"{"type":"echo","payload":"never"}"#),
        ]);
        run_session(entry, frames, &router).await;

        assert!(probe.frames().is_empty());
        assert!(probe.is_closed());
        assert_eq!(router.hub().telemetry().snapshot().messages_received, 0);
    }

    #[tokio::test]
    async fn test_read_error_removes_connection() {
        let router = router();
        let (entry, probe) = recording_entry();
        router.hub().registry().add(entry.clone()).await;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let frames = stream::iter(vec![Err(axum::Error::new(io))]);
        run_session(entry, frames, &router).await;

        assert!(probe.is_closed());
        assert!(router.hub().registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_aborted_session_still_removes_connection() {
        let router = router();
        let (entry, probe) = recording_entry();
        router.hub().registry().add(entry.clone()).await;

        let task = {
            let router = router.clone();
            let entry = entry.clone();
            tokio::spawn(async move {
                run_session(entry, stream::pending::<Result<Message, axum::Error>>(), &router).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        let _ = task.await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while !router.hub().registry().is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("guard should remove the connection");
        assert!(probe.is_closed());
    }
}
