//! Hub: the registry's serialization point
//!
//! Every pump talks to the registry through a cloneable [`HubHandle`] that
//! feeds a bounded queue. A single task drains the queue and applies events
//! one at a time, which is what keeps the membership map free of data races.
//! A full queue makes submitters wait, so a slow hub throttles producers.
//!
//! The loop ends only once every handle is dropped; no event can stop it.

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::event::{Event, TopicId};
use crate::broker::registry::Registry;
use crate::client::{Connection, ConnectionId};
use crate::utils::error::HubClosed;

#[derive(Debug)]
pub struct Hub {
    registry: Registry,
    events: Receiver<Event>,
}

#[derive(Debug, Clone)]
pub struct HubHandle {
    events: Sender<Event>,
}

impl Hub {
    /// Create a hub whose queue holds at most `capacity` pending events.
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            registry: Registry::new(),
            events: rx,
        };
        (hub, HubHandle { events: tx })
    }

    /// Create a hub and run it on the current tokio runtime.
    pub fn spawn(capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(capacity);
        (handle, tokio::spawn(hub.run()))
    }

    pub async fn run(mut self) {
        info!("hub started");
        while let Some(event) = self.events.recv().await {
            debug!(topic = event.topic(), "applying event");
            self.registry.apply(event);
        }
        info!(
            topics = self.registry.topic_count(),
            "all hub handles dropped, hub stopped"
        );
    }
}

impl HubHandle {
    /// Queue an event, waiting for room if the hub is behind.
    pub async fn submit(&self, event: Event) -> Result<(), HubClosed> {
        self.events.send(event).await.map_err(|_| HubClosed)
    }

    pub async fn subscribe(&self, topic: TopicId, connection: Connection) -> Result<(), HubClosed> {
        self.submit(Event::Subscribe { topic, connection }).await
    }

    pub async fn unsubscribe(
        &self,
        topic: TopicId,
        connection: ConnectionId,
    ) -> Result<(), HubClosed> {
        self.submit(Event::Unsubscribe { topic, connection }).await
    }

    pub async fn broadcast(&self, topic: TopicId, payload: WsMessage) -> Result<(), HubClosed> {
        self.submit(Event::Broadcast { topic, payload }).await
    }

    /// Subscribe one connection to several topics, in order.
    pub async fn subscribe_all<I>(&self, topics: I, connection: &Connection) -> Result<(), HubClosed>
    where
        I: IntoIterator<Item = TopicId>,
    {
        for topic in topics {
            self.subscribe(topic, connection.clone()).await?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
