//! Membership registry
//!
//! The registry maps topic ids to their subscriber sets. It is plain data with
//! no internal locking: the [`Hub`](crate::broker::hub::Hub) owns the only
//! instance and feeds it one [`Event`] at a time.
//!
//! Invariant: a topic key is present if and only if it has at least one
//! subscriber. Every path that can shrink a subscriber set removes the key
//! when the set becomes empty.

use std::collections::HashMap;

use tracing::{debug, info, trace};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::event::{BroadcastReport, Event, TopicId};
use crate::broker::topic::Topic;
use crate::client::{Connection, ConnectionId};

#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) topics: HashMap<TopicId, Topic>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Never fails: every event kind is total over the
    /// registry state.
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::Subscribe { topic, connection } => {
                self.subscribe(topic, connection);
            }
            Event::Unsubscribe { topic, connection } => {
                self.unsubscribe(topic, &connection);
            }
            Event::Broadcast { topic, payload } => {
                self.broadcast(topic, &payload);
            }
        }
    }

    /// Subscribe a connection to a topic, creating the topic on first use.
    /// Subscribing twice is a no-op; returns whether the connection was added.
    pub fn subscribe(&mut self, topic: TopicId, connection: Connection) -> bool {
        let connection_id = connection.id;
        let principal = connection.principal;
        let added = self
            .topics
            .entry(topic)
            .or_insert_with(|| Topic::new(topic))
            .subscribe(connection);

        if added {
            info!(%topic, connection = %connection_id, principal, "subscribed");
        } else {
            trace!(%topic, connection = %connection_id, "already subscribed");
        }
        added
    }

    /// Unsubscribe a connection from a topic. Removing a non-member is a no-op.
    pub fn unsubscribe(&mut self, topic: TopicId, connection: &ConnectionId) -> bool {
        let Some(t) = self.topics.get_mut(&topic) else {
            return false;
        };
        let removed = t.unsubscribe(connection);
        if t.is_empty() {
            self.topics.remove(&topic);
        }
        if removed {
            info!(%topic, connection = %connection, "unsubscribed");
        }
        removed
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Publishing to a topic nobody listens to is valid and delivers nothing.
    pub fn broadcast(&mut self, topic: TopicId, payload: &WsMessage) -> BroadcastReport {
        let Some(t) = self.topics.get_mut(&topic) else {
            debug!(%topic, "broadcast to topic without subscribers");
            return BroadcastReport::default();
        };

        let report = t.fan_out(payload);
        if t.is_empty() {
            self.topics.remove(&topic);
        }
        debug!(
            %topic,
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "broadcast complete"
        );
        report
    }

    pub fn contains(&self, topic: TopicId, connection: &ConnectionId) -> bool {
        self.topics
            .get(&topic)
            .is_some_and(|t| t.subscribers.contains_key(connection))
    }

    pub fn subscriber_count(&self, topic: TopicId) -> usize {
        self.topics.get(&topic).map_or(0, |t| t.subscribers.len())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
