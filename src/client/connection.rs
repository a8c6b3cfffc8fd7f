//! Connection handle and outbound delivery
//!
//! Delivery never waits on the peer. Frames are pushed into the connection's
//! bounded queue with `try_send`; a dedicated writer task drains it onto the
//! socket under a write deadline. A full queue means the peer is not keeping
//! up, and is reported the same way as a closed one so the registry can drop
//! the subscriber without stalling the rest of a broadcast.

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::event::Principal;
use crate::utils::error::DeliveryError;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub principal: Principal,
    sender: Sender<WsMessage>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a connection for `principal` around an existing outbound sender.
    /// The `id` is a fresh UUID used to identify the connection in the registry.
    pub fn new(principal: Principal, sender: Sender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal,
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a connection together with the receiving end of its outbound
    /// queue, which holds at most `capacity` undelivered frames.
    pub fn channel(principal: Principal, capacity: usize) -> (Self, Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(principal, tx), rx)
    }

    /// Hand one frame to this connection's writer.
    pub fn deliver(&self, frame: WsMessage) -> Result<(), DeliveryError> {
        if self.shutdown.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Backlogged),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Signal the writer and the inbound pump to stop. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once [`Connection::close`] has been called on any clone.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
