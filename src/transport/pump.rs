//! Inbound pump
//!
//! One pump runs per connection. It resumes the principal's stored
//! subscriptions, then reads frames until the peer goes away and turns each
//! one into a hub event:
//! - `subscribe` is checked against the membership oracle and fails closed;
//! - `unsubscribe` is always allowed;
//! - `message` is recorded and then broadcast even if recording failed, so a
//!   storage outage costs history, not delivery.
//!
//! Bad frames, unknown kinds, denied subscribes and rate-limited frames are
//! logged and skipped. A read error, a close frame, or the connection being
//! closed by the hub ends the pump, after which it unsubscribes the
//! connection from every topic it joined.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};
use tungstenite::Error as WsError;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::event::TopicId;
use crate::broker::hub::HubHandle;
use crate::client::Connection;
use crate::persistence::ChatStore;
use crate::ratelimit::OriginLimiter;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::{FrameError, HubClosed};

pub struct InboundPump {
    connection: Connection,
    origin: String,
    hub: HubHandle,
    store: Arc<dyn ChatStore>,
    limiter: Arc<OriginLimiter>,
    subscriptions: HashSet<TopicId>,
}

impl InboundPump {
    pub fn new(
        connection: Connection,
        origin: impl Into<String>,
        hub: HubHandle,
        store: Arc<dyn ChatStore>,
        limiter: Arc<OriginLimiter>,
    ) -> Self {
        Self {
            connection,
            origin: origin.into(),
            hub,
            store,
            limiter,
            subscriptions: HashSet::new(),
        }
    }

    /// Drive the pump until the frame stream ends or the connection closes.
    pub async fn run<S>(mut self, mut frames: S)
    where
        S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        let principal = self.connection.principal;
        let connection_id = self.connection.id;

        if self.resume().await.is_ok() {
            loop {
                let next = tokio::select! {
                    _ = self.connection.closed() => {
                        debug!(connection = %connection_id, "connection closed, stopping reads");
                        break;
                    }
                    next = frames.next() => next,
                };

                let frame = match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        info!(connection = %connection_id, principal, error = %e, "read error");
                        break;
                    }
                    None => break,
                };

                match self.handle_frame(frame).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(HubClosed) => {
                        warn!(connection = %connection_id, "hub stopped, dropping connection");
                        break;
                    }
                }
            }
        }

        self.release().await;
        info!(connection = %connection_id, principal, "disconnected");
    }

    /// Subscribe the connection to every topic its principal already belongs to.
    async fn resume(&mut self) -> Result<(), HubClosed> {
        let principal = self.connection.principal;
        let topics = match self.store.topics_for(principal) {
            Ok(topics) => topics,
            Err(e) => {
                warn!(principal, error = %e, "failed to list prior subscriptions");
                return Ok(());
            }
        };

        self.hub.subscribe_all(topics.iter().copied(), &self.connection).await?;
        self.subscriptions.extend(topics.iter().copied());
        info!(
            connection = %self.connection.id,
            principal,
            topics = topics.len(),
            "connected, resumed subscriptions"
        );
        Ok(())
    }

    /// Returns `Ok(false)` when the peer asked to close.
    async fn handle_frame(&mut self, frame: WsMessage) -> Result<bool, HubClosed> {
        let decoded = match frame {
            WsMessage::Text(text) => {
                if !self.admit() {
                    return Ok(true);
                }
                ClientMessage::decode(text.as_str())
            }
            WsMessage::Binary(bytes) => {
                if !self.admit() {
                    return Ok(true);
                }
                std::str::from_utf8(&bytes)
                    .map_err(|_| FrameError::NotUtf8)
                    .and_then(ClientMessage::decode)
            }
            WsMessage::Close(_) => return Ok(false),
            _ => return Ok(true),
        };

        match decoded {
            Ok(message) => self.dispatch(message).await?,
            Err(e) => {
                warn!(connection = %self.connection.id, error = %e, "dropping undecodable frame");
            }
        }
        Ok(true)
    }

    fn admit(&self) -> bool {
        let admitted = self.limiter.admit(&self.origin);
        if !admitted {
            warn!(connection = %self.connection.id, origin = %self.origin, "frame rejected by rate limit");
        }
        admitted
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), HubClosed> {
        let principal = self.connection.principal;

        match message {
            ClientMessage::Subscribe { topic } => match self.store.is_member(topic, principal) {
                Ok(true) => {
                    self.hub.subscribe(topic, self.connection.clone()).await?;
                    self.subscriptions.insert(topic);
                }
                Ok(false) => {
                    warn!(%topic, principal, "subscribe denied: not a member");
                }
                Err(e) => {
                    warn!(%topic, principal, error = %e, "subscribe denied: membership check failed");
                }
            },
            ClientMessage::Unsubscribe { topic } => {
                self.hub.unsubscribe(topic, self.connection.id).await?;
                self.subscriptions.remove(&topic);
            }
            ClientMessage::Message { topic, text } => {
                // Broadcast even if the record fails: recipients may then see
                // a message that is missing from history.
                if let Err(e) = self.store.record(topic, principal, &text) {
                    warn!(%topic, principal, error = %e, "failed to record message");
                }

                let outbound = ServerMessage::Message {
                    topic,
                    sender_principal: principal,
                    content: text,
                };
                match outbound.encode() {
                    Ok(payload) => self.hub.broadcast(topic, payload).await?,
                    Err(e) => warn!(%topic, error = %e, "failed to encode outbound message"),
                }
            }
            ClientMessage::Unknown { kind } => {
                warn!(connection = %self.connection.id, kind = %kind, "ignoring unknown message kind");
            }
        }
        Ok(())
    }

    /// Close the connection and leave every topic it joined.
    async fn release(&mut self) {
        self.connection.close();
        for topic in self.subscriptions.drain() {
            if self
                .hub
                .unsubscribe(topic, self.connection.id)
                .await
                .is_err()
            {
                break;
            }
        }
    }
}
