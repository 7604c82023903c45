//! Broadcast Relay
//!
//! Best-effort fan-out of server messages to room members. Each connection
//! owns a bounded outbound queue drained by its writer task; a full or closed
//! queue is skipped without retry so one slow client never stalls the others.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::game::state::PlayerId;
use crate::network::protocol::ServerMessage;

/// Handle to a connection's outbound queue.
pub type OutboundSender = mpsc::Sender<ServerMessage>;

/// Who in the room receives a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience<'a> {
    /// Every member, the actor included.
    Everyone,
    /// Every member except the actor.
    AllBut(&'a PlayerId),
}

impl Audience<'_> {
    fn includes(&self, player_id: &PlayerId) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::AllBut(excluded) => *excluded != player_id,
        }
    }
}

/// Enqueue a message for one connection. Returns false if it was dropped.
pub fn send_to(player_id: &PlayerId, sender: &OutboundSender, message: ServerMessage) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            debug!("Outbound queue full for {}, dropping {:?}", player_id, dropped);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Outbound queue closed for {}", player_id);
            false
        }
    }
}

/// Fan a message out to the selected members. Returns how many accepted it.
pub fn broadcast<'a>(
    members: impl IntoIterator<Item = (&'a PlayerId, &'a OutboundSender)>,
    audience: Audience<'_>,
    message: &ServerMessage,
) -> usize {
    members
        .into_iter()
        .filter(|(id, _)| audience.includes(id))
        .filter(|(id, sender)| send_to(id, sender, message.clone()))
        .count()
}
