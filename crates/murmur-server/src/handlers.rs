//! Connection handlers for Murmur server.
//!
//! This module is the transport side of the relay: it accepts WebSocket
//! connections, feeds their frames to the [`MessageRouter`] in arrival order
//! and forwards everything published to the room back out to each socket.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use murmur_core::{ConnectionId, MessageRouter, Room};
use murmur_protocol::{codec, error_codes, ErrorReply, EventType};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: MessageRouter,
    /// The shared room every socket subscribes to.
    pub room: Arc<Room>,
    /// Server configuration.
    pub config: Config,
    /// Open WebSocket connections.
    active_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let room = Arc::new(Room::with_capacity(config.room.capacity));

        Self {
            router: MessageRouter::new(room.clone()),
            room,
            config,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

/// Reserved slot under `limits.max_connections`, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Murmur server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let state = Arc::new(AppState::new(config));
    info!("Room buffers {} events per client", state.room.capacity());

    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Murmur server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();

    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "participants": stats.participants,
        "users": state.router.participants(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached, rejecting upgrade"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Subscribe before registering so the connection sees its own JOIN.
    let mut events = state.room.subscribe();
    state.router.on_connect(&connection_id);

    loop {
        tokio::select! {
            biased;

            // Forward room events to the client
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = match codec::encode(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                error!(connection = %connection_id, error = %e, "Failed to encode event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(connection = %connection_id, skipped, "Client lagging, events dropped");
                        metrics::record_error("lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                let flow = match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_payload(text.as_bytes(), &connection_id, &state, &mut sender).await
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_payload(&data, &connection_id, &state, &mut sender).await
                    }
                    Some(Ok(Message::Ping(data))) => {
                        match sender.send(Message::Pong(data)).await {
                            Ok(()) => ControlFlow::Continue(()),
                            Err(_) => ControlFlow::Break(()),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => ControlFlow::Continue(()),
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        ControlFlow::Break(())
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        ControlFlow::Break(())
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        ControlFlow::Break(())
                    }
                };

                if flow.is_break() {
                    break;
                }
            }
        }
    }

    // Cleanup: announce the departure if the client had joined
    match state.router.on_disconnect(&connection_id) {
        Ok(Some(event)) => metrics::record_broadcast(event.kind.as_str()),
        Ok(None) => {}
        Err(e) => warn!(connection = %connection_id, error = %e, "Disconnect cleanup failed"),
    }
    metrics::set_participants(state.router.stats().participants);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Process one inbound payload.
///
/// Breaks when the socket should be closed: the client left the room, or a
/// reply could not be delivered.
async fn handle_payload(
    data: &[u8],
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    sender: &mut WsSink,
) -> ControlFlow<()> {
    metrics::record_inbound(data.len());

    let max = state.config.limits.max_message_size;
    if data.len() > max {
        warn!(connection = %connection_id, size = data.len(), max, "Payload too large");
        metrics::record_rejected("too_large");
        let reply = ErrorReply::new(
            error_codes::PAYLOAD_TOO_LARGE,
            format!("Payload size {} exceeds maximum {}", data.len(), max),
        );
        return send_reply(sender, &reply).await;
    }

    let start = Instant::now();
    let result = state.router.on_raw(connection_id, data);
    metrics::record_latency(start.elapsed().as_secs_f64());

    match result {
        Ok(Some(event)) => {
            metrics::record_broadcast(event.kind.as_str());
            if event.kind == EventType::Chat {
                return ControlFlow::Continue(());
            }

            metrics::set_participants(state.router.stats().participants);
            if event.kind == EventType::Leave {
                debug!(connection = %connection_id, "Client left, closing connection");
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
        Ok(None) => ControlFlow::Continue(()),
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Event rejected");
            metrics::record_rejected(e.kind());
            send_reply(sender, &e.to_reply()).await
        }
    }
}

/// Send an error reply to this connection only.
async fn send_reply(sender: &mut WsSink, reply: &ErrorReply) -> ControlFlow<()> {
    let text = match codec::encode_reply(reply) {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "Failed to encode error reply");
            return ControlFlow::Continue(());
        }
    };

    match sender.send(Message::Text(text)).await {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => ControlFlow::Break(()),
    }
}
