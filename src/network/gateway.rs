//! Connection Gateway
//!
//! Binds a transport to a verified identity and owns the resulting
//! [`Connection`] for its whole lifetime. At most one connection per identity
//! is live: a newer one kicks the older and waits for its disconnect cleanup
//! before it is admitted.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::state::{Identity, PlayerId, RoomCode};
use crate::network::protocol::{ClientMessage, ProtocolError};
use crate::network::registry::RoomRegistry;
use crate::network::relay::OutboundSender;

/// Unique per accepted transport.
pub type ConnectionId = Uuid;

/// Resolves when a newer connection for the same identity takes over.
pub type Superseded = oneshot::Receiver<()>;

/// An authenticated connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    sender: OutboundSender,
    /// Current room, set and cleared only by the registry.
    room: Option<RoomCode>,
    /// Flipped to true once disconnect cleanup has finished.
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection for a verified identity.
    pub fn new(identity: Identity, sender: OutboundSender) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            identity,
            sender,
            room: None,
            closed,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Verified identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Player identifier.
    pub fn player_id(&self) -> &PlayerId {
        &self.identity.id
    }

    /// Outbound queue.
    pub fn sender(&self) -> &OutboundSender {
        &self.sender
    }

    /// Room the connection is currently in.
    pub fn room(&self) -> Option<&RoomCode> {
        self.room.as_ref()
    }

    pub(crate) fn set_room(&mut self, room: Option<RoomCode>) {
        self.room = room;
    }

    pub(crate) fn take_room(&mut self) -> Option<RoomCode> {
        self.room.take()
    }
}

/// Registry entry for an identity's live connection.
struct LiveConnection {
    connection_id: ConnectionId,
    kick: Option<oneshot::Sender<()>>,
    closed: watch::Receiver<bool>,
}

/// The connection gateway.
pub struct Gateway {
    registry: Arc<RoomRegistry>,
    live: Mutex<BTreeMap<PlayerId, LiveConnection>>,
    strict_room_codes: bool,
}

impl Gateway {
    /// Create a gateway over a room registry.
    ///
    /// With `strict_room_codes`, joins with codes other than six ASCII digits
    /// are ignored before they reach the registry.
    pub fn new(registry: Arc<RoomRegistry>, strict_room_codes: bool) -> Self {
        Self {
            registry,
            live: Mutex::new(BTreeMap::new()),
            strict_room_codes,
        }
    }

    /// Room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Number of live connections.
    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Admit a connection for `identity`.
    ///
    /// If the identity already has a live connection, that one is kicked and
    /// this call waits until its cleanup has run.
    pub async fn open(&self, identity: Identity, sender: OutboundSender) -> (Connection, Superseded) {
        loop {
            let (previous_id, kick, mut closed) = {
                let mut live = self.live.lock().await;
                match live.get_mut(&identity.id) {
                    Some(entry) => (entry.connection_id, entry.kick.take(), entry.closed.clone()),
                    None => {
                        let (kick_tx, kick_rx) = oneshot::channel();
                        let conn = Connection::new(identity, sender);
                        live.insert(conn.player_id().clone(), LiveConnection {
                            connection_id: conn.id(),
                            kick: Some(kick_tx),
                            closed: conn.closed.subscribe(),
                        });
                        info!("Connection {} opened for {}", conn.id(), conn.player_id());
                        return (conn, kick_rx);
                    }
                }
            };

            info!("{} reconnected, superseding connection {}", identity.id, previous_id);
            if let Some(kick) = kick {
                let _ = kick.send(());
            }
            // Err means the old connection's task is gone; treat it as closed.
            let _ = closed.wait_for(|closed| *closed).await;

            let mut live = self.live.lock().await;
            if live.get(&identity.id).is_some_and(|e| e.connection_id == previous_id) {
                live.remove(&identity.id);
            }
        }
    }

    /// Run disconnect cleanup and release the identity.
    pub async fn close(&self, mut conn: Connection) {
        if let Some(player) = self.registry.disconnect(&mut conn).await {
            debug!("{} removed from its room on close", player.id);
        }

        {
            let mut live = self.live.lock().await;
            if live.get(conn.player_id()).is_some_and(|e| e.connection_id == conn.id()) {
                live.remove(conn.player_id());
            }
        }

        let _ = conn.closed.send(true);
        info!("Connection {} for {} closed", conn.id(), conn.player_id());
    }

    /// Decode one inbound text frame and act on it.
    ///
    /// Unknown actions are answered with `error`; anything else that fails to
    /// decode is logged and dropped.
    pub async fn handle_frame(&self, conn: &mut Connection, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.dispatch(conn, message).await,
            Err(err @ ProtocolError::UnknownAction(_)) => {
                debug!("{} from {}", err, conn.player_id());
                self.registry.report_error(conn, err.to_string()).await;
            }
            Err(err) => {
                debug!("Dropping frame from {}: {}", conn.player_id(), err);
            }
        }
    }

    /// Route a decoded message. Room errors are absorbed here.
    pub async fn dispatch(&self, conn: &mut Connection, message: ClientMessage) {
        let action = message.action();
        let result = match message {
            ClientMessage::JoinRoom(code) => {
                if self.strict_room_codes && !code.is_well_formed() {
                    debug!("Ignoring malformed room code {:?} from {}", code.as_str(), conn.player_id());
                    return;
                }
                self.registry.join_room(conn, code).await;
                Ok(())
            }
            ClientMessage::LeaveRoom(code) => self.registry.leave_room(conn, &code).await.map(|_| ()),
            ClientMessage::Ready => self.registry.ready(conn).await.map(|_| ()),
            ClientMessage::Unready => self.registry.unready(conn).await.map(|_| ()),
            ClientMessage::Move(pose) => self.registry.move_player(conn, pose).await,
            ClientMessage::Shoot(shot) => self.registry.shoot(conn, shot).await,
            ClientMessage::Hit(hit) => self.registry.hit(conn, &hit.target_id).await.map(|_| ()),
        };

        if let Err(err) = result {
            debug!("Dropped {} from {}: {}", action, conn.player_id(), err);
        }
    }
}
