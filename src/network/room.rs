//! Room
//!
//! One room's membership, ready-check phase, and combat ledger. Every method
//! runs under the room's lock, so membership, readiness, and session state
//! change as one linearized sequence and broadcasts go out in that order.

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::game::combat::{HitOutcome, Pose, SessionState};
use crate::game::ready::{evaluate_ready, ReadyOutcome};
use crate::game::state::{Identity, Player, PlayerId, RoomCode, RoomPhase};
use crate::network::protocol::{ServerMessage, ShotPayload};
use crate::network::relay::{self, Audience, OutboundSender};

/// Room operation errors. Absorbed by the gateway, never sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No room with that code, or not the connection's room.
    #[error("Unknown room")]
    UnknownRoom,

    /// Actor is not a member of the room.
    #[error("Not a member of the room")]
    NotAMember,

    /// Combat event while the room is in the lobby.
    #[error("Room is not in session")]
    InvalidPhase,

    /// Actor has no combat state (joined after the session started).
    #[error("No combat state for player")]
    NoCombatState,

    /// Hit target has no combat state.
    #[error("Unknown hit target")]
    UnknownTarget,
}

/// A room member: its lobby record and a handle to its outbound queue.
#[derive(Debug)]
pub struct Member {
    /// Lobby record.
    pub player: Player,
    /// Outbound queue of the member's connection.
    pub sender: OutboundSender,
}

/// A game room.
#[derive(Debug)]
pub struct Room {
    code: RoomCode,
    phase: RoomPhase,
    members: BTreeMap<PlayerId, Member>,
    session: Option<SessionState>,
    /// Set once the last member leaves; a closed room is never reused.
    closed: bool,
    created_at: Instant,
}

impl Room {
    /// Create an empty lobby.
    pub fn new(code: RoomCode) -> Self {
        Self {
            code,
            phase: RoomPhase::Lobby,
            members: BTreeMap::new(),
            session: None,
            closed: false,
            created_at: Instant::now(),
        }
    }

    /// Room code.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Current phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Combat ledger, present only in session.
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a player is a member.
    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.members.contains_key(player_id)
    }

    /// Check if the room was emptied and unlinked.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Snapshot of every member's lobby record.
    pub fn players(&self) -> Vec<Player> {
        self.members.values().map(|m| m.player.clone()).collect()
    }

    fn broadcast(&self, audience: Audience<'_>, message: ServerMessage) -> usize {
        let recipients = self.members.iter().map(|(id, m)| (id, &m.sender));
        relay::broadcast(recipients, audience, &message)
    }

    /// Broadcast an error notice to every member.
    pub fn broadcast_error(&self, message: String) {
        self.broadcast(Audience::Everyone, ServerMessage::Error { message });
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Add a member as NotReady and announce it.
    ///
    /// The joiner gets `room-populate`, everyone else gets `room-join`.
    /// Returns the membership including the joiner.
    pub fn add_member(&mut self, identity: &Identity, sender: OutboundSender) -> Vec<Player> {
        let player = Player::from_identity(identity);
        let id = player.id.clone();

        self.members.insert(id.clone(), Member { player: player.clone(), sender: sender.clone() });
        if self.phase == RoomPhase::InSession {
            debug!("{} joined room {} mid-session as spectator", id, self.code);
        }

        self.broadcast(Audience::AllBut(&id), ServerMessage::RoomJoin { player });

        let players = self.players();
        relay::send_to(&id, &sender, ServerMessage::RoomPopulate { players: players.clone() });
        players
    }

    /// Remove a member and its combat state.
    ///
    /// The last member out closes the room; otherwise the rest get
    /// `room-leave`.
    pub fn remove_member(&mut self, player_id: &PlayerId) -> Result<Player, RoomError> {
        let member = self.members.remove(player_id).ok_or(RoomError::NotAMember)?;

        if self.members.is_empty() {
            self.session = None;
            self.phase = RoomPhase::Lobby;
            self.closed = true;
            info!(
                "Room {} emptied after {:?}",
                self.code,
                self.created_at.elapsed()
            );
            return Ok(member.player);
        }

        let ledger_emptied = match self.session.as_mut() {
            Some(session) => {
                session.remove(player_id);
                session.is_empty()
            }
            None => false,
        };
        self.broadcast(Audience::Everyone, ServerMessage::RoomLeave { player: member.player.clone() });
        if ledger_emptied {
            self.end_session();
        }
        Ok(member.player)
    }

    /// Drop the ledger once no combatant is left; spectators go back to the lobby.
    fn end_session(&mut self) {
        self.session = None;
        self.phase = RoomPhase::Lobby;
        info!("Room {} back to lobby, no combatants left", self.code);

        let reset: Vec<Player> = self
            .members
            .values_mut()
            .map(|m| {
                m.player.is_ready = false;
                m.player.clone()
            })
            .collect();
        for user in reset {
            self.broadcast(Audience::Everyone, ServerMessage::ReadyStatus { user });
        }
    }

    // =========================================================================
    // READY-CHECK
    // =========================================================================

    /// Apply a ready toggle, announce it, and start the session if every
    /// member is now ready.
    pub fn set_ready(&mut self, player_id: &PlayerId, ready: bool, now_ms: i64) -> Result<ReadyOutcome, RoomError> {
        let member = self.members.get_mut(player_id).ok_or(RoomError::NotAMember)?;
        member.player.is_ready = ready;
        let user = member.player.clone();

        self.broadcast(Audience::Everyone, ServerMessage::ReadyStatus { user });

        let outcome = if ready {
            evaluate_ready(self.phase, self.members.values().map(|m| &m.player))
        } else if self.phase == RoomPhase::InSession {
            ReadyOutcome::Cosmetic
        } else {
            ReadyOutcome::Waiting
        };

        if outcome == ReadyOutcome::StartSession {
            self.start_session(now_ms);
        }
        Ok(outcome)
    }

    fn start_session(&mut self, now_ms: i64) {
        self.session = Some(SessionState::start(self.members.keys().cloned(), now_ms));
        self.phase = RoomPhase::InSession;
        info!("Room {} starting session with {} players", self.code, self.members.len());
        self.broadcast(Audience::Everyone, ServerMessage::StartGame);
    }

    // =========================================================================
    // COMBAT
    // =========================================================================

    fn session_mut(&mut self) -> Result<&mut SessionState, RoomError> {
        match self.phase {
            RoomPhase::InSession => self.session.as_mut().ok_or(RoomError::InvalidPhase),
            RoomPhase::Lobby => Err(RoomError::InvalidPhase),
        }
    }

    /// Merge a pose and relay it to the other members.
    pub fn relay_move(&mut self, player_id: &PlayerId, pose: Pose, now_ms: i64) -> Result<(), RoomError> {
        if !self.contains(player_id) {
            return Err(RoomError::NotAMember);
        }
        if !self.session_mut()?.apply_move(player_id, &pose, now_ms) {
            return Err(RoomError::NoCombatState);
        }
        self.broadcast(Audience::AllBut(player_id), ServerMessage::PlayerMove { id: player_id.clone(), pose });
        Ok(())
    }

    /// Relay a shot to the other members.
    pub fn relay_shoot(&mut self, player_id: &PlayerId, shot: ShotPayload) -> Result<(), RoomError> {
        if !self.contains(player_id) {
            return Err(RoomError::NotAMember);
        }
        if !self.session_mut()?.contains(player_id) {
            return Err(RoomError::NoCombatState);
        }
        self.broadcast(Audience::AllBut(player_id), ServerMessage::PlayerShoot { id: player_id.clone(), shot });
        Ok(())
    }

    /// Adjudicate a hit and announce the outcome to everyone.
    pub fn adjudicate_hit(&mut self, shooter_id: &PlayerId, target_id: &PlayerId) -> Result<HitOutcome, RoomError> {
        if !self.contains(shooter_id) {
            return Err(RoomError::NotAMember);
        }
        let session = self.session_mut()?;
        if !session.contains(shooter_id) {
            return Err(RoomError::NoCombatState);
        }
        let outcome = session.apply_hit(shooter_id, target_id).ok_or(RoomError::UnknownTarget)?;

        self.broadcast(Audience::Everyone, ServerMessage::PlayerHit {
            target_id: outcome.target_id.clone(),
            shooter_id: outcome.shooter_id.clone(),
            health: outcome.health,
        });
        if outcome.eliminated {
            info!("Room {}: {} eliminated by {}", self.code, outcome.target_id, outcome.shooter_id);
            self.broadcast(Audience::Everyone, ServerMessage::PlayerEliminated {
                target_id: outcome.target_id.clone(),
                shooter_id: outcome.shooter_id.clone(),
            });
        }
        Ok(outcome)
    }
}
