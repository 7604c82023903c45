//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Inbound frames are `{"action": ..., "message": ...}` envelopes; outbound
//! frames are internally tagged by `type`. All frames are JSON text.

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

use crate::game::combat::Pose;
use crate::game::state::{Player, PlayerId, RoomCode};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join (or create) a room.
    JoinRoom(RoomCode),
    /// Leave a room.
    LeaveRoom(RoomCode),
    /// Mark self ready.
    Ready,
    /// Mark self not ready.
    Unready,
    /// Report own pose.
    Move(Pose),
    /// Report a shot.
    Shoot(ShotPayload),
    /// Report a hit on another player.
    Hit(HitPayload),
}

/// Shot report, relayed verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotPayload {
    /// Muzzle x.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Muzzle y.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Firing angle (radians).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    /// Projectile speed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// Hit report. Anything besides the target is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitPayload {
    /// Player that was hit.
    pub target_id: PlayerId,
}

/// Raw inbound envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    message: Value,
}

/// Inbound decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope names an action the server does not know.
    #[error("Unknown message type: {0}")]
    UnknownAction(String),

    /// Known action with a payload of the wrong shape.
    #[error("invalid payload for {action}: {reason}")]
    InvalidPayload {
        /// Action name.
        action: &'static str,
        /// What was wrong.
        reason: String,
    },
}

impl ClientMessage {
    /// Action name used on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom(_) => "join-room",
            ClientMessage::LeaveRoom(_) => "leave-room",
            ClientMessage::Ready => "ready",
            ClientMessage::Unready => "unready",
            ClientMessage::Move(_) => "move",
            ClientMessage::Shoot(_) => "shoot",
            ClientMessage::Hit(_) => "hit",
        }
    }

    /// Deserialize from a JSON envelope.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(s)?;
        let action = envelope.action.trim().to_lowercase();

        match action.as_str() {
            "join-room" => Ok(ClientMessage::JoinRoom(room_code("join-room", envelope.message)?)),
            "leave-room" => Ok(ClientMessage::LeaveRoom(room_code("leave-room", envelope.message)?)),
            "ready" => Ok(ClientMessage::Ready),
            "unready" => Ok(ClientMessage::Unready),
            "move" => Ok(ClientMessage::Move(payload("move", envelope.message)?)),
            "shoot" => Ok(ClientMessage::Shoot(payload("shoot", envelope.message)?)),
            "hit" => Ok(ClientMessage::Hit(payload("hit", envelope.message)?)),
            _ => Err(ProtocolError::UnknownAction(envelope.action)),
        }
    }

    /// Serialize to a JSON envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let message = match self {
            ClientMessage::JoinRoom(code) | ClientMessage::LeaveRoom(code) => serde_json::to_value(code)?,
            ClientMessage::Ready | ClientMessage::Unready => Value::Null,
            ClientMessage::Move(pose) => serde_json::to_value(pose)?,
            ClientMessage::Shoot(shot) => serde_json::to_value(shot)?,
            ClientMessage::Hit(hit) => serde_json::to_value(hit)?,
        };
        serde_json::to_string(&Envelope {
            action: self.action().to_string(),
            message,
        })
    }
}

fn room_code(action: &'static str, message: Value) -> Result<RoomCode, ProtocolError> {
    match message {
        Value::String(code) if !code.trim().is_empty() => Ok(RoomCode::new(code.trim())),
        Value::Number(n) => Ok(RoomCode::new(n.to_string())),
        other => Err(ProtocolError::InvalidPayload {
            action,
            reason: format!("expected room code, got {}", other),
        }),
    }
}

fn payload<T: serde::de::DeserializeOwned>(action: &'static str, message: Value) -> Result<T, ProtocolError> {
    // Missing payload decodes like an empty object.
    let message = if message.is_null() { Value::Object(Default::default()) } else { message };
    serde_json::from_value(message).map_err(|e| ProtocolError::InvalidPayload {
        action,
        reason: e.to_string(),
    })
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full membership, sent to a player right after it joins.
    RoomPopulate {
        /// Every member, the recipient included.
        players: Vec<Player>,
    },

    /// Someone joined the room.
    RoomJoin {
        /// The new member.
        player: Player,
    },

    /// Someone left the room.
    RoomLeave {
        /// The departed member.
        player: Player,
    },

    /// A player's ready flag changed.
    ReadyStatus {
        /// The member with its updated flag.
        user: Player,
    },

    /// Every member is ready; combat begins.
    StartGame,

    /// Another player moved.
    PlayerMove {
        /// Mover.
        id: PlayerId,
        /// Fields the mover reported.
        #[serde(flatten)]
        pose: Pose,
    },

    /// Another player fired.
    PlayerShoot {
        /// Shooter.
        id: PlayerId,
        /// Shot as reported.
        #[serde(flatten)]
        shot: ShotPayload,
    },

    /// Adjudicated hit.
    #[serde(rename_all = "camelCase")]
    PlayerHit {
        /// Player that was hit.
        target_id: PlayerId,
        /// Player that fired.
        shooter_id: PlayerId,
        /// Target health after the hit.
        health: i32,
    },

    /// Target's health reached zero.
    #[serde(rename_all = "camelCase")]
    PlayerEliminated {
        /// Eliminated player.
        target_id: PlayerId,
        /// Player credited with the elimination.
        shooter_id: PlayerId,
    },

    /// Error notice.
    Error {
        /// Human-readable text.
        message: String,
    },
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
