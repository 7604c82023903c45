//! Ready-Check
//!
//! Per-player readiness gate and the lobby → session predicate.
//! Callers hold the room lock, so the snapshot passed in already reflects the
//! toggle that triggered the evaluation.

use crate::game::state::{Player, RoomPhase};

/// Minimum members for a session to start.
pub const MIN_PLAYERS: usize = 2;

/// Result of a ready toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Flag updated, lobby keeps waiting.
    Waiting,
    /// Flag updated while already in session. No game-state effect.
    Cosmetic,
    /// Every member is ready: the session must start now.
    StartSession,
}

/// Check the all-ready predicate over a membership snapshot.
///
/// True iff there are at least [`MIN_PLAYERS`] members and every one is ready.
pub fn all_ready<'a>(players: impl IntoIterator<Item = &'a Player>) -> bool {
    let mut count = 0;
    for player in players {
        if !player.is_ready {
            return false;
        }
        count += 1;
    }
    count >= MIN_PLAYERS
}

/// Decide what a `ready()` toggle leads to.
pub fn evaluate_ready<'a>(
    phase: RoomPhase,
    players: impl IntoIterator<Item = &'a Player>,
) -> ReadyOutcome {
    match phase {
        RoomPhase::InSession => ReadyOutcome::Cosmetic,
        RoomPhase::Lobby if all_ready(players) => ReadyOutcome::StartSession,
        RoomPhase::Lobby => ReadyOutcome::Waiting,
    }
}
