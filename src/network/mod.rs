//! Network Layer
//!
//! WebSocket server, connection gateway and the room registry that carries
//! lobby and combat traffic between members.

pub mod auth;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;
pub mod server;

pub use auth::{authenticate, AuthConfig, AuthError, TokenClaims};
pub use gateway::{Connection, ConnectionId, Gateway};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use registry::RoomRegistry;
pub use room::{Room, RoomError};
pub use server::{GameServer, GameServerError, ServerConfig};
