//! Room Registry
//!
//! Creates, finds, and destroys rooms keyed by code, and routes each
//! connection's actions to its current room. Every room sits behind its own
//! lock; the map lock is never held while waiting on a room.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::game::combat::{HitOutcome, Pose, SessionState};
use crate::game::ready::ReadyOutcome;
use crate::game::state::{Player, PlayerId, RoomCode, RoomPhase};
use crate::network::gateway::Connection;
use crate::network::protocol::{ServerMessage, ShotPayload};
use crate::network::relay;
use crate::network::room::{Room, RoomError};

type SharedRoom = Arc<RwLock<Room>>;

/// Current time in Unix milliseconds.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Registry of live rooms.
pub struct RoomRegistry {
    rooms: RwLock<BTreeMap<RoomCode, SharedRoom>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get or lazily create the room for a code.
    async fn open_room(&self, code: &RoomCode) -> SharedRoom {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(code.clone())
            .or_insert_with(|| {
                info!("Created room {}", code);
                Arc::new(RwLock::new(Room::new(code.clone())))
            })
            .clone()
    }

    async fn find_room(&self, code: &RoomCode) -> Option<SharedRoom> {
        self.rooms.read().await.get(code).cloned()
    }

    /// Unlink a closed room, unless the code already points at a newer one.
    async fn unlink(&self, code: &RoomCode, room: &SharedRoom) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(code).is_some_and(|current| Arc::ptr_eq(current, room)) {
            rooms.remove(code);
            info!("Destroyed room {}", code);
        }
    }

    async fn current_room(&self, conn: &Connection) -> Result<SharedRoom, RoomError> {
        let code = conn.room().ok_or(RoomError::UnknownRoom)?;
        self.find_room(code).await.ok_or(RoomError::UnknownRoom)
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Join a room, leaving the current one first.
    ///
    /// Creates the room if the code is unknown. The joiner receives
    /// `room-populate`; the returned list is the same membership.
    pub async fn join_room(&self, conn: &mut Connection, code: RoomCode) -> Vec<Player> {
        if conn.room().is_some() {
            self.disconnect(conn).await;
        }

        loop {
            let room = self.open_room(&code).await;
            let mut guard = room.write().await;
            if guard.is_closed() {
                // Emptied between lookup and lock; make way for a fresh lobby.
                drop(guard);
                self.unlink(&code, &room).await;
                continue;
            }

            let players = guard.add_member(conn.identity(), conn.sender().clone());
            conn.set_room(Some(code.clone()));
            debug!("{} joined room {} ({} members)", conn.player_id(), code, players.len());
            return players;
        }
    }

    /// Leave a room explicitly. A code other than the current room is ignored.
    pub async fn leave_room(&self, conn: &mut Connection, code: &RoomCode) -> Result<Player, RoomError> {
        if conn.room() != Some(code) {
            return Err(RoomError::UnknownRoom);
        }
        self.leave_current(conn).await
    }

    /// Leave whatever room the connection is in. Runs on every connection close.
    pub async fn disconnect(&self, conn: &mut Connection) -> Option<Player> {
        self.leave_current(conn).await.ok()
    }

    async fn leave_current(&self, conn: &mut Connection) -> Result<Player, RoomError> {
        let code = conn.take_room().ok_or(RoomError::UnknownRoom)?;
        let room = self.find_room(&code).await.ok_or(RoomError::UnknownRoom)?;

        let (result, closed) = {
            let mut guard = room.write().await;
            let result = guard.remove_member(conn.player_id());
            (result, guard.is_closed())
        };
        if closed {
            self.unlink(&code, &room).await;
        }
        if result.is_ok() {
            debug!("{} left room {}", conn.player_id(), code);
        }
        result
    }

    // =========================================================================
    // READY-CHECK
    // =========================================================================

    /// Mark the connection's player ready; may start the session.
    pub async fn ready(&self, conn: &Connection) -> Result<ReadyOutcome, RoomError> {
        let room = self.current_room(conn).await?;
        let mut guard = room.write().await;
        guard.set_ready(conn.player_id(), true, now_ms())
    }

    /// Mark the connection's player not ready.
    pub async fn unready(&self, conn: &Connection) -> Result<ReadyOutcome, RoomError> {
        let room = self.current_room(conn).await?;
        let mut guard = room.write().await;
        guard.set_ready(conn.player_id(), false, now_ms())
    }

    // =========================================================================
    // COMBAT
    // =========================================================================

    /// Merge and relay a move.
    pub async fn move_player(&self, conn: &Connection, pose: Pose) -> Result<(), RoomError> {
        let room = self.current_room(conn).await?;
        let mut guard = room.write().await;
        guard.relay_move(conn.player_id(), pose, now_ms())
    }

    /// Relay a shot.
    pub async fn shoot(&self, conn: &Connection, shot: ShotPayload) -> Result<(), RoomError> {
        let room = self.current_room(conn).await?;
        let mut guard = room.write().await;
        guard.relay_shoot(conn.player_id(), shot)
    }

    /// Adjudicate a hit on `target_id`.
    pub async fn hit(&self, conn: &Connection, target_id: &PlayerId) -> Result<HitOutcome, RoomError> {
        let room = self.current_room(conn).await?;
        let mut guard = room.write().await;
        guard.adjudicate_hit(conn.player_id(), target_id)
    }

    /// Report an error to the connection's room, or to the connection alone
    /// when it is not in a room.
    pub async fn report_error(&self, conn: &Connection, message: String) {
        match self.current_room(conn).await {
            Ok(room) => room.read().await.broadcast_error(message),
            Err(_) => {
                relay::send_to(conn.player_id(), conn.sender(), ServerMessage::Error { message });
            }
        }
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Membership of a room.
    pub async fn members(&self, code: &RoomCode) -> Option<Vec<Player>> {
        let room = self.find_room(code).await?;
        let guard = room.read().await;
        Some(guard.players())
    }

    /// Phase of a room.
    pub async fn phase(&self, code: &RoomCode) -> Option<RoomPhase> {
        let room = self.find_room(code).await?;
        let phase = room.read().await.phase();
        Some(phase)
    }

    /// Snapshot of a room's combat ledger.
    pub async fn session(&self, code: &RoomCode) -> Option<SessionState> {
        let room = self.find_room(code).await?;
        let session = room.read().await.session().cloned();
        session
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::MAX_HEALTH;
    use crate::game::state::Identity;
    use tokio::sync::mpsc;

    type Inbox = mpsc::Receiver<ServerMessage>;

    fn connect(id: &str) -> (Connection, Inbox) {
        let (tx, rx) = mpsc::channel(256);
        (Connection::new(Identity::new(id, id.to_uppercase()), tx), rx)
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn count_start(messages: &[ServerMessage]) -> usize {
        messages.iter().filter(|m| **m == ServerMessage::StartGame).count()
    }

    async fn session_of_two(registry: &RoomRegistry, code: &RoomCode) -> (Connection, Inbox, Connection, Inbox) {
        let (mut c1, mut rx1) = connect("p1");
        let (mut c2, mut rx2) = connect("p2");
        registry.join_room(&mut c1, code.clone()).await;
        registry.join_room(&mut c2, code.clone()).await;
        registry.ready(&c1).await.unwrap();
        registry.ready(&c2).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);
        (c1, rx1, c2, rx2)
    }

    #[tokio::test]
    async fn test_two_players_ready_scenario() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (mut c1, mut rx1) = connect("p1");
        let (mut c2, mut rx2) = connect("p2");

        registry.join_room(&mut c1, code.clone()).await;
        let populate = registry.join_room(&mut c2, code.clone()).await;
        assert_eq!(populate.len(), 2);

        assert_eq!(registry.ready(&c1).await, Ok(ReadyOutcome::Waiting));
        assert_eq!(count_start(&drain(&mut rx1)), 0);
        assert_eq!(registry.phase(&code).await, Some(RoomPhase::Lobby));
        assert!(registry.session(&code).await.is_none());

        assert_eq!(registry.ready(&c2).await, Ok(ReadyOutcome::StartSession));
        assert_eq!(count_start(&drain(&mut rx1)), 1);
        assert_eq!(count_start(&drain(&mut rx2)), 1);

        let session = registry.session(&code).await.unwrap();
        assert_eq!(session.len(), 2);
        for id in ["p1", "p2"] {
            let state = session.get(&PlayerId::from(id)).unwrap();
            assert_eq!(state.health, MAX_HEALTH);
            assert_eq!(state.score, 0);
        }
    }

    #[tokio::test]
    async fn test_unready_does_not_revert_session() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (c1, _rx1, _c2, _rx2) = session_of_two(&registry, &code).await;

        assert_eq!(registry.unready(&c1).await, Ok(ReadyOutcome::Cosmetic));
        assert_eq!(registry.phase(&code).await, Some(RoomPhase::InSession));
        assert!(registry.session(&code).await.is_some());
    }

    #[tokio::test]
    async fn test_five_hits_scenario() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (c1, _rx1, _c2, mut rx2) = session_of_two(&registry, &code).await;
        let p2 = PlayerId::from("p2");

        let mut healths = Vec::new();
        for _ in 0..5 {
            healths.push(registry.hit(&c1, &p2).await.unwrap().health);
        }
        assert_eq!(healths, vec![90, 80, 70, 60, 50]);

        let seen: Vec<i32> = drain(&mut rx2)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::PlayerHit { health, .. } => Some(health),
                _ => None,
            })
            .collect();
        assert_eq!(seen, healths);
    }

    #[tokio::test]
    async fn test_elimination_scenario() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (c1, mut rx1, _c2, _rx2) = session_of_two(&registry, &code).await;
        let p1 = PlayerId::from("p1");
        let p2 = PlayerId::from("p2");

        for _ in 0..9 {
            registry.hit(&c1, &p2).await.unwrap();
        }
        assert_eq!(registry.session(&code).await.unwrap().get(&p2).unwrap().health, 10);
        drain(&mut rx1);

        registry.hit(&c1, &p2).await.unwrap();
        assert_eq!(
            drain(&mut rx1),
            vec![
                ServerMessage::PlayerHit { target_id: p2.clone(), shooter_id: p1.clone(), health: 0 },
                ServerMessage::PlayerEliminated { target_id: p2.clone(), shooter_id: p1.clone() },
            ]
        );

        registry.hit(&c1, &p2).await.unwrap();
        assert_eq!(
            drain(&mut rx1),
            vec![ServerMessage::PlayerHit { target_id: p2, shooter_id: p1, health: 0 }]
        );
    }

    #[tokio::test]
    async fn test_hit_in_lobby_dropped() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (mut c1, mut rx1) = connect("p1");
        let (mut c2, mut rx2) = connect("p2");
        registry.join_room(&mut c1, code.clone()).await;
        registry.join_room(&mut c2, code.clone()).await;
        drain(&mut rx1);
        drain(&mut rx2);

        assert_eq!(registry.hit(&c1, &PlayerId::from("p2")).await, Err(RoomError::InvalidPhase));
        assert_eq!(registry.move_player(&c1, Pose::default()).await, Err(RoomError::InvalidPhase));
        assert_eq!(registry.shoot(&c1, ShotPayload::default()).await, Err(RoomError::InvalidPhase));
        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_last_leave_destroys_room() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (mut c1, _rx1, mut c2, _rx2) = session_of_two(&registry, &code).await;

        registry.leave_room(&mut c1, &code).await.unwrap();
        assert_eq!(registry.room_count().await, 1);
        registry.leave_room(&mut c2, &code).await.unwrap();
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.session(&code).await.is_none());
        assert!(c1.room().is_none());

        // Same code, fresh lobby.
        let (mut c3, _rx3) = connect("p3");
        let players = registry.join_room(&mut c3, code.clone()).await;
        assert_eq!(players.len(), 1);
        assert_eq!(registry.phase(&code).await, Some(RoomPhase::Lobby));
        assert!(registry.session(&code).await.is_none());
    }

    #[tokio::test]
    async fn test_join_leaves_previous_room() {
        let registry = RoomRegistry::new();
        let a = RoomCode::from("111111");
        let b = RoomCode::from("222222");
        let (mut c1, _rx1) = connect("p1");
        let (mut c2, mut rx2) = connect("p2");

        registry.join_room(&mut c1, a.clone()).await;
        registry.join_room(&mut c2, a.clone()).await;
        drain(&mut rx2);

        registry.join_room(&mut c1, b.clone()).await;
        assert_eq!(c1.room(), Some(&b));
        assert_eq!(registry.members(&a).await.unwrap().len(), 1);
        assert_eq!(registry.members(&b).await.unwrap().len(), 1);
        assert!(matches!(&drain(&mut rx2)[..], [ServerMessage::RoomLeave { player }] if player.id.as_str() == "p1"));

        // Moving the last member out destroys the old room.
        registry.join_room(&mut c2, b.clone()).await;
        assert!(registry.members(&a).await.is_none());
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_leave_wrong_code_ignored() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (mut c1, _rx1) = connect("p1");
        registry.join_room(&mut c1, code.clone()).await;

        let result = registry.leave_room(&mut c1, &RoomCode::from("999999")).await;
        assert_eq!(result, Err(RoomError::UnknownRoom));
        assert_eq!(c1.room(), Some(&code));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_leave_after_removal_reports_not_a_member() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (mut c1, _rx1) = connect("p1");
        let (mut c2, mut rx2) = connect("p2");
        registry.join_room(&mut c1, code.clone()).await;
        registry.join_room(&mut c2, code.clone()).await;

        let room = registry.find_room(&code).await.unwrap();
        room.write().await.remove_member(&PlayerId::from("p1")).unwrap();
        drain(&mut rx2);

        let result = registry.leave_room(&mut c1, &code).await;
        assert_eq!(result, Err(RoomError::NotAMember));
        assert!(c1.room().is_none());
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.disconnect(&mut c1).await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_mid_session_cleans_up() {
        let registry = RoomRegistry::new();
        let code = RoomCode::from("123456");
        let (mut c1, mut rx1, mut c2, _rx2) = session_of_two(&registry, &code).await;

        let left = registry.disconnect(&mut c2).await.unwrap();
        assert_eq!(left.id.as_str(), "p2");
        assert!(!registry.session(&code).await.unwrap().contains(&PlayerId::from("p2")));
        assert!(matches!(&drain(&mut rx1)[..], [ServerMessage::RoomLeave { .. }]));

        // Hit on the departed player is a no-op.
        assert_eq!(registry.hit(&c1, &PlayerId::from("p2")).await, Err(RoomError::UnknownTarget));

        registry.disconnect(&mut c1).await;
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.disconnect(&mut c1).await.is_none());
    }

    #[tokio::test]
    async fn test_not_in_room_errors() {
        let registry = RoomRegistry::new();
        let (c1, mut rx1) = connect("p1");
        assert_eq!(registry.ready(&c1).await, Err(RoomError::UnknownRoom));

        registry.report_error(&c1, "Unknown message type: dance".into()).await;
        assert_eq!(
            drain(&mut rx1),
            vec![ServerMessage::Error { message: "Unknown message type: dance".into() }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ready_starts_once() {
        let registry = Arc::new(RoomRegistry::new());
        let code = RoomCode::from("424242");

        let mut conns = Vec::new();
        let mut inboxes = Vec::new();
        for i in 0..8 {
            let (mut conn, rx) = connect(&format!("p{}", i));
            registry.join_room(&mut conn, code.clone()).await;
            conns.push(conn);
            inboxes.push(rx);
        }

        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.ready(&conn).await })
            })
            .collect();

        let mut starts = 0;
        for handle in handles {
            if handle.await.unwrap() == Ok(ReadyOutcome::StartSession) {
                starts += 1;
            }
        }
        assert_eq!(starts, 1);
        assert_eq!(count_start(&drain(&mut inboxes[0])), 1);
        assert_eq!(registry.session(&code).await.unwrap().len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_leave_never_leaks_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let code = RoomCode::from("777777");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let code = code.clone();
                tokio::spawn(async move {
                    let (mut conn, _rx) = connect(&format!("p{}", i));
                    for _ in 0..20 {
                        registry.join_room(&mut conn, code.clone()).await;
                        registry.disconnect(&mut conn).await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.room_count().await, 0);
    }
}
