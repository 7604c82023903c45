//! WebSocket Room Server
//!
//! Async WebSocket listener. Authenticates each upgrade request, then hands
//! the connection to the gateway and pumps frames between the socket and the
//! connection's outbound queue.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::network::auth::{authenticate, token_from_query, AuthConfig, AuthError};
use crate::network::gateway::Gateway;
use crate::network::protocol::ServerMessage;
use crate::network::registry::RoomRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Ignore joins whose room code is not six ASCII digits.
    pub strict_room_codes: bool,
    /// How long an accepted socket may take to finish the upgrade.
    pub handshake_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_connections: 1000,
            outbound_buffer: 64,
            strict_room_codes: true,
            handshake_timeout: Duration::from_secs(30),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load config from environment variables, keeping defaults for anything
    /// unset or invalid.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: parse_var(&lookup, "BIND_ADDR", defaults.bind_addr),
            max_connections: positive_var(&lookup, "MAX_CONNECTIONS", defaults.max_connections),
            outbound_buffer: positive_var(&lookup, "OUTBOUND_BUFFER", defaults.outbound_buffer),
            strict_room_codes: flag_var(&lookup, "STRICT_ROOM_CODES", defaults.strict_room_codes),
            handshake_timeout: Duration::from_secs(positive_var(
                &lookup,
                "HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout.as_secs() as usize,
            ) as u64),
            version: defaults.version,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {} '{}', using default", name, raw);
            default
        }),
        None => default,
    }
}

fn positive_var(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> usize {
    match parse_var(lookup, name, default) {
        0 => {
            warn!("{} must be > 0, using default", name);
            default
        }
        value => value,
    }
}

fn flag_var(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    match lookup(name).as_deref().map(str::trim) {
        None => default,
        Some("1") | Some("true") => true,
        Some("0") | Some("false") => false,
        Some(raw) => {
            warn!("Invalid {} '{}', using default", name, raw);
            default
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Token verification is not usable.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// The room server.
pub struct GameServer {
    config: ServerConfig,
    auth: Arc<AuthConfig>,
    gateway: Arc<Gateway>,
    /// Accepted sockets, including those still in the handshake.
    active: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, auth: AuthConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let gateway = Gateway::new(Arc::new(RoomRegistry::new()), config.strict_room_codes);

        Self {
            config,
            auth: Arc::new(auth),
            gateway: Arc::new(gateway),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        if !self.auth.is_configured() {
            return Err(AuthError::NotConfigured.into());
        }

        info!("Room server v{} listening on {}", self.config.version, listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.active.load(Ordering::Acquire) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
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
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let gateway = self.gateway.clone();
        let auth = self.auth.clone();
        let active = self.active.clone();
        let outbound_buffer = self.config.outbound_buffer;
        let handshake_timeout = self.config.handshake_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        active.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let mut identity = None;
            let verify = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                match authenticate(token_from_query(request.uri().query()), &auth) {
                    Ok(verified) => {
                        identity = Some(verified);
                        Ok(response)
                    }
                    Err(e) => {
                        warn!("Rejected handshake from {}: {}", addr, e);
                        Err(unauthorized(&e))
                    }
                }
            };

            let ws_stream = match tokio::time::timeout(handshake_timeout, accept_hdr_async(stream, verify)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    active.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
                Err(_) => {
                    debug!("WebSocket handshake timed out for {}", addr);
                    active.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            };
            let Some(identity) = identity else {
                active.fetch_sub(1, Ordering::AcqRel);
                return;
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(outbound_buffer);
            let (mut conn, mut superseded) = gateway.open(identity, msg_tx).await;

            // Writer task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
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
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                gateway.handle_frame(&mut conn, &text).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                debug!("Ignoring {} byte binary frame from {}", data.len(), conn.player_id());
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut superseded => {
                        info!("Connection {} superseded by a newer one", conn.id());
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            sender_task.abort();
            gateway.close(conn).await;
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Get live room count.
    pub async fn room_count(&self) -> usize {
        self.gateway.registry().room_count().await
    }
}

fn unauthorized(err: &AuthError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
