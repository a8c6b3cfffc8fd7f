//! Topic management
//!
//! A `Topic` holds the connections currently subscribed to one topic id.
//! Subscribers are keyed by connection id, so subscribing twice is a no-op.
//!
//! Concurrency note: a `Topic` is only ever touched by the hub task that owns
//! the registry.

use std::collections::HashMap;

use tracing::warn;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::event::{BroadcastReport, TopicId};
use crate::client::{Connection, ConnectionId};

#[derive(Debug)]
pub struct Topic {
    pub id: TopicId,
    pub subscribers: HashMap<ConnectionId, Connection>,
}

impl Topic {
    /// Create a new topic with no subscribers.
    pub fn new(id: TopicId) -> Self {
        Self {
            id,
            subscribers: HashMap::new(),
        }
    }

    /// Add a subscriber. Returns `false` if it was already present.
    pub fn subscribe(&mut self, connection: Connection) -> bool {
        if self.subscribers.contains_key(&connection.id) {
            return false;
        }
        self.subscribers.insert(connection.id, connection);
        true
    }

    /// Remove a subscriber. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `payload` to every subscriber. A subscriber whose delivery
    /// fails is closed and removed; the others still receive the frame.
    pub fn fan_out(&mut self, payload: &WsMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let topic = self.id;

        self.subscribers
            .retain(|id, connection| match connection.deliver(payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(e) => {
                    warn!(%topic, connection = %id, principal = connection.principal, error = %e, "delivery failed, dropping subscriber");
                    connection.close();
                    report.dropped.push(*id);
                    false
                }
            });

        report
    }
}
