//! Room and Player State Definitions
//!
//! Identity and lobby types shared by the ready-check and combat logic.
//! Uses BTreeMap-friendly ordered ids so member iteration is stable.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Verified player identifier, as issued by the authentication provider.
///
/// Opaque to the server: it is never parsed, only compared.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// ROOM CODE
// =============================================================================

/// Room code, treated as an opaque key by the registry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Length of a well-formed room code.
    pub const LEN: usize = 6;

    /// Wrap a code string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the front-end's code format: exactly six ASCII digits.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LEN && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// IDENTITY & PLAYER
// =============================================================================

/// Identity handed over by the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Player identifier.
    pub id: PlayerId,
    /// Name shown to other players.
    pub display_name: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: PlayerId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// A player as seen by the other members of its room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub display_name: String,
    /// Ready-check flag.
    pub is_ready: bool,
}

impl Player {
    /// Fresh lobby record for an identity. Always starts NotReady.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            is_ready: false,
        }
    }
}

// =============================================================================
// ROOM PHASE
// =============================================================================

/// Room lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomPhase {
    /// Ready-check active.
    #[default]
    Lobby,
    /// Combat active.
    InSession,
}
