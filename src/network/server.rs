//! WebSocket Relay Server
//!
//! Async WebSocket server for duel clients.
//! Accepts connections, assigns session ids, and routes decoded messages to
//! the lifecycle coordinator and the event relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::duel::{
    EventRelay, LifecycleCoordinator, RelayKind, RelayOutcome, RoomError, RoomRegistry,
    SessionId, SessionTable,
};
use crate::network::protocol::{
    AckReply, AckResponse, ClientFrame, ClientMessage, EndInfo, ServerMessage,
    REASON_SERVER_SHUTDOWN,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Silence after which a connection counts as dropped.
    pub ping_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            outbound_buffer: 64,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables. Unset or unparsable values
    /// keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("DUEL_HOST")
            .ok()
            .and_then(|v| v.parse::<std::net::IpAddr>().ok())
            .unwrap_or(defaults.bind_addr.ip());
        let port = std::env::var("DUEL_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.bind_addr.port());

        Self {
            bind_addr: SocketAddr::new(host, port),
            max_connections: env_parse("DUEL_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            ping_interval: env_parse("DUEL_PING_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ping_interval),
            ping_timeout: env_parse("DUEL_PING_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ping_timeout),
            ..defaults
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Shared handles each connection task works with.
#[derive(Clone)]
struct Services {
    sessions: Arc<SessionTable>,
    registry: Arc<RoomRegistry>,
    lifecycle: Arc<LifecycleCoordinator>,
    relay: Arc<EventRelay>,
}

/// The relay server.
pub struct RelayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Shared state.
    services: Services,
    /// One permit per accepted stream, held until its task ends.
    connection_slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let sessions = Arc::new(SessionTable::new());
        let registry = Arc::new(RoomRegistry::new());

        Self {
            connection_slots: Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS))),
            config,
            services: Services {
                lifecycle: Arc::new(LifecycleCoordinator::new(registry.clone(), sessions.clone())),
                relay: Arc::new(EventRelay::new(registry.clone(), sessions.clone())),
                sessions,
                registry,
            },
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        info!("Duel relay v{} listening on {}", self.config.version, listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Counts streams still in the handshake too
                            let permit = match self.connection_slots.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting {}", addr);
                                    continue;
                                }
                            };

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let services = self.services.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);

            let session_id = SessionId::new_random();
            services.lifecycle.connect(session_id, msg_tx.clone()).await;
            info!(session = %session_id, "Client {} connected", addr);

            // Writer task: queued messages plus liveness pings
            let ping_interval = config.ping_interval;
            let mut sender_task = tokio::spawn(async move {
                let mut ping = interval(ping_interval);
                ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ping.tick().await;

                loop {
                    tokio::select! {
                        msg = msg_rx.recv() => {
                            let msg = match msg {
                                Some(m) => m,
                                None => break,
                            };
                            let text = match msg.to_json() {
                                Ok(t) => t,
                                Err(e) => {
                                    error!("Failed to serialize message: {}", e);
                                    continue;
                                }
                            };
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        _ = ping.tick() => {
                            if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                let _ = ws_sender.close().await;
            });

            // Reader loop
            loop {
                tokio::select! {
                    next = timeout(config.ping_timeout, ws_receiver.next()) => {
                        let msg = match next {
                            Ok(msg) => msg,
                            Err(_) => {
                                info!(session = %session_id, "Client {} timed out", addr);
                                break;
                            }
                        };

                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientFrame::from_json(&text) {
                                    Ok(frame) => {
                                        Self::handle_client_message(session_id, frame, &services, &msg_tx).await;
                                    }
                                    Err(e) => {
                                        debug!(session = %session_id, "Invalid message: {}", e);
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!(session = %session_id, "Ignoring binary frame");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} closed connection", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/Pong only refresh the timeout
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        Self::reply(session_id, &msg_tx, ServerMessage::Shutdown(EndInfo::new(REASON_SERVER_SHUTDOWN)));
                        break;
                    }
                }
            }

            // Cleanup
            services.lifecycle.disconnect(session_id).await;
            drop(msg_tx);
            // Let the writer flush what is queued, then close
            if timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                debug!(session = %session_id, "Writer did not finish in time, aborting");
                sender_task.abort();
            }

            info!(session = %session_id, "Client {} cleaned up", addr);
        });
    }

    /// Handle a decoded client message.
    async fn handle_client_message(
        session_id: SessionId,
        frame: ClientFrame,
        services: &Services,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let ClientFrame { ack, message } = frame;

        match message {
            ClientMessage::CreateDuelRoom => {
                let response = match services.lifecycle.create_duel_room(session_id).await {
                    Ok(created) => AckResponse::Created(created),
                    Err(e) => Self::rejection(session_id, e),
                };
                Self::reply(session_id, sender, ServerMessage::Ack(AckReply { id: ack, response }));
            }
            ClientMessage::JoinDuelRoom(code) => {
                let response = match services.lifecycle.join_duel_room(session_id, &code).await {
                    Ok(joined) => AckResponse::Joined(joined),
                    Err(e) => Self::rejection(session_id, e),
                };
                Self::reply(session_id, sender, ServerMessage::Ack(AckReply { id: ack, response }));
            }
            ClientMessage::LeaveRoom => {
                services.lifecycle.leave_room(session_id).await;
            }
            ClientMessage::DuelEvent(payload) => {
                Self::relay(session_id, RelayKind::DuelEvent, payload, services).await;
            }
            ClientMessage::TurnOver(payload) => {
                Self::relay(session_id, RelayKind::TurnOver, payload, services).await;
            }
            ClientMessage::InitDeck(payload) => {
                Self::relay(session_id, RelayKind::InitDeck, payload, services).await;
            }
            ClientMessage::BattleMessage(payload) => {
                Self::relay(session_id, RelayKind::BattleMessage, payload, services).await;
            }
        }
    }

    async fn relay(
        session_id: SessionId,
        kind: RelayKind,
        payload: serde_json::Value,
        services: &Services,
    ) {
        if let RelayOutcome::Dropped(reason) = services.relay.relay(session_id, kind, payload).await {
            debug!(session = %session_id, kind = kind.name(), ?reason, "Dropped message");
        }
    }

    /// Queue a message for this connection without waiting on a full queue.
    fn reply(session_id: SessionId, sender: &mpsc::Sender<ServerMessage>, msg: ServerMessage) {
        if sender.try_send(msg).is_err() {
            debug!(session = %session_id, "Reply dropped, outbound queue unavailable");
        }
    }

    fn rejection(session_id: SessionId, err: RoomError) -> AckResponse {
        match &err {
            RoomError::IdCollision(id) => error!(session = %session_id, "Room id collision on {}", id),
            _ => debug!(session = %session_id, "Request refused: {}", err),
        }
        AckResponse::Rejected(err.into())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.services.sessions.len().await
    }

    /// Get live room count.
    pub async fn room_count(&self) -> usize {
        self.services.registry.room_count().await
    }
}
