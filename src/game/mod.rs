//! Game Logic Module
//!
//! Room-independent rules: identities and phases, the all-ready start
//! condition, and the per-session combat ledger. Nothing here touches the
//! network; the `network` layer applies these rules under each room's lock.
//!
//! ## Module Structure
//!
//! - `state`: Player identifiers, room codes, lobby entries, room phase
//! - `ready`: All-ready evaluation
//! - `combat`: Health, score, pose and hit adjudication

pub mod combat;
pub mod ready;
pub mod state;

// Re-export key types
pub use combat::{CombatState, HitOutcome, Pose, SessionState, HIT_DAMAGE, MAX_HEALTH};
pub use ready::{evaluate_ready, ReadyOutcome, MIN_PLAYERS};
pub use state::{Identity, Player, PlayerId, RoomCode, RoomPhase};
