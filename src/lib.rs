//! # Tank Rooms Server
//!
//! Real-time room server for a multiplayer tank game. Players join rooms by
//! code, ready up in a lobby, and once everyone is ready the room switches to
//! a combat session where the server relays movement and shots and
//! adjudicates hits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TANK ROOMS SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Rules (no I/O)                            │
//! │  ├── state.rs    - Ids, room codes, lobby entries, phase     │
//! │  ├── ready.rs    - All-ready start condition                 │
//! │  └── combat.rs   - Health, score, hit adjudication           │
//! │                                                              │
//! │  network/        - Connections and rooms                     │
//! │  ├── server.rs   - WebSocket listener, handshake auth        │
//! │  ├── auth.rs     - Token verification                        │
//! │  ├── gateway.rs  - Identity binding, supersede, dispatch     │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── registry.rs - Room lifecycle and membership             │
//! │  ├── room.rs     - One room's lobby and session              │
//! │  └── relay.rs    - Best-effort fan-out                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Every room sits behind its own lock. Membership changes, ready
//! evaluation and hit adjudication run under that lock, so each room sees a
//! single order of events and the session starts exactly once. Broadcasts
//! are queued while the lock is held, which keeps per-room delivery order
//! identical for every member.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::state::{Identity, Player, PlayerId, RoomCode, RoomPhase};
pub use network::{AuthConfig, GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
