//! Server lifecycle: start, readiness probing and graceful stop
//!
//! ```text
//! WsServer::new(config) ──▶ start() ──▶ block_until_ready() ──▶ ... ──▶ stop()
//!                             │                                          │
//!                       bind + spawn                         remove every connection
//!                       axum::serve                          log telemetry
//!                                                            graceful shutdown (bounded)
//! ```

use super::websocket::protocol::{Envelope, HEALTH_CHECK};
use super::websocket::{
    Broadcaster, ConnectionRegistry, HandlerRegistry, MessageRouter, SessionContext, build_router,
};
use crate::config::ServerConfig;
use crate::core::error::ServerError;
use crate::core::telemetry::Telemetry;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as ClientMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Lower bound on how long one readiness attempt waits for its reply
const MIN_PROBE_WAIT: Duration = Duration::from_millis(100);

struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// A WebSocket fan-out server
///
/// # Example
///
/// ```rust,ignore
/// let server = WsServer::new(ServerConfig::from_port_and_path("8080/ws")?)?;
/// server.start().await?;
/// server.block_until_ready().await?;
///
/// wait_for_exit_then_cleanup(|| server.stop(), std::future::pending()).await;
/// ```
pub struct WsServer {
    config: Arc<ServerConfig>,
    telemetry: Arc<Telemetry>,
    registry: Arc<ConnectionRegistry>,
    handlers: Arc<HandlerRegistry>,
    running: Mutex<Option<RunningServer>>,
}

impl WsServer {
    /// Create a server with the built-in handlers enabled in `config`
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        Self::with_handlers(config, HandlerRegistry::new())
    }

    /// Create a server with extra handlers on top of the configured built-ins
    ///
    /// A custom handler registered under a built-in's type replaces it.
    pub fn with_handlers(config: ServerConfig, custom: HandlerRegistry) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let mut handlers = HandlerRegistry::with_builtins(&config.handlers);
        handlers.extend(custom);

        let telemetry = Arc::new(Telemetry::new());
        let registry = Arc::new(ConnectionRegistry::new(telemetry.clone()));

        Ok(Self {
            config: Arc::new(config),
            telemetry,
            registry,
            handlers: Arc::new(handlers),
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Delivery handle for pushing messages from outside a handler
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(self.registry.clone(), self.telemetry.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Address the listener is bound to, if running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bind the listener and spawn the accept loop
    ///
    /// Returns as soon as the listener is bound, with the actual address
    /// (port 0 resolves to the assigned port).
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let ctx = Arc::new(SessionContext {
            router: MessageRouter::new(self.handlers.clone(), self.broadcaster()),
            origin_policy: self.config.origin_policy.clone(),
        });
        let app = build_router(&self.config, ctx);

        self.registry.open_admission();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(
            addr = %local_addr,
            path = %self.config.base_path,
            handlers = ?self.handlers.message_types(),
            "WebSocket server listening"
        );

        *running = Some(RunningServer {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// Wait until the server answers a real handshake and health check
    ///
    /// Probes the bound address (or the configured one if not started) up
    /// to `readiness.attempts` times, `readiness.delay_ms` apart.
    pub async fn block_until_ready(&self) -> Result<(), ServerError> {
        let target = match self.local_addr().await {
            Some(addr) => probe_host(addr).to_string(),
            None => match self.config.listen_addr.parse::<SocketAddr>() {
                Ok(addr) => probe_host(addr).to_string(),
                Err(_) => self.config.listen_addr.clone(),
            },
        };
        let url = format!("ws://{}{}", target, self.config.base_path);
        let expect_reply = self.handlers.contains(HEALTH_CHECK);
        let delay = self.config.readiness.delay();
        let wait = delay.max(MIN_PROBE_WAIT);

        retry_readiness(self.config.readiness.attempts, delay, |_| {
            let url = url.clone();
            async move { probe_once(&url, expect_reply, wait).await }
        })
        .await
    }

    /// Drain every connection, then stop the listener within the timeout
    ///
    /// Admission is closed before the registry snapshot is taken, so an
    /// upgrade that completes while stopping is closed instead of outliving
    /// the server.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(ServerError::NotStarted);
        };
        tracing::info!("Stopping WebSocket server");
        self.registry.close_admission();

        let registry = self.registry.clone();
        let removed = self
            .registry
            .for_each(|entry| {
                let registry = registry.clone();
                async move { registry.remove(&entry).await }
            })
            .await;
        tracing::info!(
            terminated = removed.into_iter().filter(|r| *r).count(),
            "Terminated connections"
        );

        self.telemetry.log_summary();

        let _ = running.shutdown_tx.send(());
        let timeout = self.config.shutdown_timeout();
        let mut task = running.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("Server shutdown complete");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(ServerError::Io(e)),
            Ok(Err(e)) => Err(ServerError::Internal(e.to_string())),
            Err(_) => {
                task.abort();
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Listener shutdown timed out");
                Err(ServerError::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Map an unspecified bind address to loopback on the same port
fn probe_host(addr: SocketAddr) -> SocketAddr {
    if !addr.ip().is_unspecified() {
        return addr;
    }
    let ip = match addr.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    };
    SocketAddr::new(ip, addr.port())
}

/// Run `probe` until it succeeds or `attempts` runs out
///
/// Sleeps `delay` between attempts, not after the last one.
pub(crate) async fn retry_readiness<F, Fut>(
    attempts: u32,
    delay: Duration,
    mut probe: F,
) -> Result<(), ServerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    for attempt in 1..=attempts {
        match probe(attempt).await {
            Ok(()) => {
                tracing::info!(attempt, "Server is ready");
                return Ok(());
            }
            Err(e) => tracing::debug!(attempt, error = %e, "Readiness probe failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(ServerError::NotReady { attempts })
}

/// One readiness round trip: handshake, health check, reply
async fn probe_once(url: &str, expect_reply: bool, wait: Duration) -> anyhow::Result<()> {
    let (mut ws, _) = tokio::time::timeout(wait, connect_async(url)).await??;

    let hello = Envelope::new(HEALTH_CHECK, Value::Null).encode()?;
    ws.send(ClientMessage::Text(hello.into())).await?;

    if expect_reply {
        tokio::time::timeout(wait, await_health_reply(&mut ws)).await??;
    }

    let _ = ws.close(None).await;
    Ok(())
}

async fn await_health_reply(
    ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> anyhow::Result<()> {
    while let Some(msg) = ws.next().await {
        if let ClientMessage::Text(text) = msg?
            && let Ok(envelope) = Envelope::decode(text.as_str().as_bytes())
            && envelope.message_type == HEALTH_CHECK
        {
            return Ok(());
        }
    }
    anyhow::bail!("connection closed before health-check reply")
}
