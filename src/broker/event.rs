//! Registry events
//!
//! [`Event`] is the only way to mutate or query the membership registry. The
//! hub applies events strictly in arrival order, so a broadcast never sees a
//! subscribe that was queued after it.

use tungstenite::protocol::Message as WsMessage;

use crate::client::{Connection, ConnectionId};

/// Integer identifier of a broadcast domain (a chat channel).
pub type TopicId = i64;

/// Identity of the user behind a connection, assigned by the handshake layer.
pub type Principal = i64;

#[derive(Debug)]
pub enum Event {
    Subscribe {
        topic: TopicId,
        connection: Connection,
    },
    Unsubscribe {
        topic: TopicId,
        connection: ConnectionId,
    },
    /// `payload` is an encoded outbound frame, cloned once per subscriber.
    Broadcast { topic: TopicId, payload: WsMessage },
}

impl Event {
    pub fn topic(&self) -> TopicId {
        match self {
            Event::Subscribe { topic, .. }
            | Event::Unsubscribe { topic, .. }
            | Event::Broadcast { topic, .. } => *topic,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers removed because delivery to them failed.
    pub dropped: Vec<ConnectionId>,
}
