//! Combat Session State
//!
//! Authoritative per-room health/score ledger. Exists only while the room is
//! in session. Client-reported poses are trusted; only hits are adjudicated.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::state::PlayerId;

/// Health every combatant starts the session with.
pub const MAX_HEALTH: i32 = 100;

/// Health removed by a single hit.
pub const HIT_DAMAGE: i32 = 10;

/// Score awarded to the shooter for an elimination.
pub const ELIMINATION_SCORE: i32 = 1;

// =============================================================================
// POSE
// =============================================================================

/// Last reported tank pose. Every field is optional so partial updates merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pose {
    /// Horizontal position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Vertical position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Hull rotation (radians).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    /// Turret rotation (radians).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turret_rotation: Option<f64>,
}

impl Pose {
    /// Merge an update into this pose, last write wins per field.
    pub fn merge(&mut self, update: &Pose) {
        if update.x.is_some() {
            self.x = update.x;
        }
        if update.y.is_some() {
            self.y = update.y;
        }
        if update.rotation.is_some() {
            self.rotation = update.rotation;
        }
        if update.turret_rotation.is_some() {
            self.turret_rotation = update.turret_rotation;
        }
    }
}

// =============================================================================
// COMBAT STATE
// =============================================================================

/// Authoritative state of one combatant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatState {
    /// Remaining health, never below zero.
    pub health: i32,
    /// Eliminations scored this session.
    pub score: i32,
    /// Last reported pose.
    pub pose: Pose,
    /// Unix milliseconds of the last move merged into this state.
    pub last_update_timestamp: i64,
}

impl CombatState {
    /// Fresh combatant at full health.
    pub fn new(now_ms: i64) -> Self {
        Self {
            health: MAX_HEALTH,
            score: 0,
            pose: Pose::default(),
            last_update_timestamp: now_ms,
        }
    }

    /// Check if this combatant has been eliminated.
    #[inline]
    pub fn is_eliminated(&self) -> bool {
        self.health == 0
    }
}

/// Adjudicated result of a hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HitOutcome {
    /// Player that was hit.
    pub target_id: PlayerId,
    /// Player that fired.
    pub shooter_id: PlayerId,
    /// Target health after the hit.
    pub health: i32,
    /// True only for the hit that took health from above zero to zero.
    pub eliminated: bool,
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Per-room combat ledger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    combatants: BTreeMap<PlayerId, CombatState>,
}

impl SessionState {
    /// Start a session with every given player at full health.
    pub fn start(players: impl IntoIterator<Item = PlayerId>, now_ms: i64) -> Self {
        Self {
            combatants: players
                .into_iter()
                .map(|id| (id, CombatState::new(now_ms)))
                .collect(),
        }
    }

    /// Get a combatant's state.
    pub fn get(&self, player_id: &PlayerId) -> Option<&CombatState> {
        self.combatants.get(player_id)
    }

    /// Check if a player takes part in this session.
    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.combatants.contains_key(player_id)
    }

    /// Number of combatants.
    pub fn len(&self) -> usize {
        self.combatants.len()
    }

    /// Check if no combatants remain.
    pub fn is_empty(&self) -> bool {
        self.combatants.is_empty()
    }

    /// Iterate combatants in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&PlayerId, &CombatState)> {
        self.combatants.iter()
    }

    /// Drop a combatant (leave or disconnect).
    pub fn remove(&mut self, player_id: &PlayerId) -> Option<CombatState> {
        self.combatants.remove(player_id)
    }

    /// Merge a pose update. Returns false if the player has no combat state.
    pub fn apply_move(&mut self, player_id: &PlayerId, update: &Pose, now_ms: i64) -> bool {
        match self.combatants.get_mut(player_id) {
            Some(state) => {
                state.pose.merge(update);
                state.last_update_timestamp = now_ms;
                true
            }
            None => false,
        }
    }

    /// Adjudicate a hit. Returns None if the target has no combat state.
    ///
    /// Health is clamped at zero and `eliminated` is set only on the
    /// transition to zero, so repeated hits on a wreck never re-eliminate.
    pub fn apply_hit(&mut self, shooter_id: &PlayerId, target_id: &PlayerId) -> Option<HitOutcome> {
        let target = self.combatants.get_mut(target_id)?;
        let before = target.health;
        target.health = (target.health - HIT_DAMAGE).max(0);
        let health = target.health;
        let eliminated = before > 0 && health == 0;

        if eliminated && shooter_id != target_id {
            if let Some(shooter) = self.combatants.get_mut(shooter_id) {
                shooter.score += ELIMINATION_SCORE;
            }
        }

        Some(HitOutcome {
            target_id: target_id.clone(),
            shooter_id: shooter_id.clone(),
            health,
            eliminated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn two_player_session() -> (SessionState, PlayerId, PlayerId) {
        let p1 = PlayerId::from("p1");
        let p2 = PlayerId::from("p2");
        let session = SessionState::start([p1.clone(), p2.clone()], 0);
        (session, p1, p2)
    }

    #[test]
    fn test_start_full_health() {
        let (session, p1, p2) = two_player_session();
        assert_eq!(session.len(), 2);
        for id in [&p1, &p2] {
            let state = session.get(id).unwrap();
            assert_eq!(state.health, MAX_HEALTH);
            assert_eq!(state.score, 0);
        }
    }

    #[test]
    fn test_five_hits_health_sequence() {
        let (mut session, p1, p2) = two_player_session();
        let healths: Vec<i32> = (0..5)
            .map(|_| session.apply_hit(&p1, &p2).unwrap().health)
            .collect();
        assert_eq!(healths, vec![90, 80, 70, 60, 50]);
    }

    #[test]
    fn test_elimination_fires_once() {
        let (mut session, p1, p2) = two_player_session();
        for _ in 0..9 {
            assert!(!session.apply_hit(&p1, &p2).unwrap().eliminated);
        }
        assert_eq!(session.get(&p2).unwrap().health, 10);

        let killing = session.apply_hit(&p1, &p2).unwrap();
        assert_eq!(killing.health, 0);
        assert!(killing.eliminated);
        assert!(session.get(&p2).unwrap().is_eliminated());

        let after = session.apply_hit(&p1, &p2).unwrap();
        assert_eq!(after.health, 0);
        assert!(!after.eliminated);
    }

    #[test]
    fn test_elimination_scores_shooter() {
        let (mut session, p1, p2) = two_player_session();
        for _ in 0..12 {
            session.apply_hit(&p1, &p2);
        }
        assert_eq!(session.get(&p1).unwrap().score, ELIMINATION_SCORE);
        assert_eq!(session.get(&p2).unwrap().score, 0);
    }

    #[test]
    fn test_self_elimination_scores_nothing() {
        let (mut session, p1, _) = two_player_session();
        for _ in 0..10 {
            session.apply_hit(&p1, &p1);
        }
        let state = session.get(&p1).unwrap();
        assert!(state.is_eliminated());
        assert_eq!(state.score, 0);
    }

    #[test]
    fn test_hit_unknown_target_is_noop() {
        let (mut session, p1, _) = two_player_session();
        let before = session.clone();
        assert!(session.apply_hit(&p1, &PlayerId::from("ghost")).is_none());
        assert_eq!(session, before);
    }

    #[test]
    fn test_move_merges_fields() {
        let (mut session, p1, _) = two_player_session();
        let first = Pose { x: Some(1.0), y: Some(2.0), rotation: Some(0.5), turret_rotation: None };
        assert!(session.apply_move(&p1, &first, 100));

        let partial = Pose { x: Some(3.0), ..Pose::default() };
        assert!(session.apply_move(&p1, &partial, 200));

        let state = session.get(&p1).unwrap();
        assert_eq!(state.pose.x, Some(3.0));
        assert_eq!(state.pose.y, Some(2.0));
        assert_eq!(state.pose.rotation, Some(0.5));
        assert_eq!(state.pose.turret_rotation, None);
        assert_eq!(state.last_update_timestamp, 200);
    }

    #[test]
    fn test_move_without_state() {
        let (mut session, _, _) = two_player_session();
        assert!(!session.apply_move(&PlayerId::from("ghost"), &Pose::default(), 1));
    }

    #[test]
    fn test_remove_empties_session() {
        let (mut session, p1, p2) = two_player_session();
        session.remove(&p1);
        assert!(!session.is_empty());
        session.remove(&p2);
        assert!(session.is_empty());
    }

    proptest! {
        #[test]
        fn prop_health_never_negative(hits in 0usize..64) {
            let (mut session, p1, p2) = two_player_session();
            let mut eliminations = 0;
            for _ in 0..hits {
                let outcome = session.apply_hit(&p1, &p2).unwrap();
                prop_assert!(outcome.health >= 0);
                if outcome.eliminated {
                    eliminations += 1;
                }
            }
            let expected_health = (MAX_HEALTH - HIT_DAMAGE * hits as i32).max(0);
            prop_assert_eq!(session.get(&p2).unwrap().health, expected_health);
            prop_assert_eq!(eliminations, if expected_health == 0 { 1 } else { 0 });
        }

        #[test]
        fn prop_mixed_targets_eliminate_at_most_once(targets in proptest::collection::vec(any::<bool>(), 0..80)) {
            let (mut session, p1, p2) = two_player_session();
            let mut eliminated_p1 = 0;
            let mut eliminated_p2 = 0;
            for hit_p1 in targets {
                let (shooter, target) = if hit_p1 { (&p2, &p1) } else { (&p1, &p2) };
                let outcome = session.apply_hit(shooter, target).unwrap();
                if outcome.eliminated {
                    if hit_p1 { eliminated_p1 += 1 } else { eliminated_p2 += 1 }
                }
            }
            prop_assert!(eliminated_p1 <= 1);
            prop_assert!(eliminated_p2 <= 1);
        }
    }
}
