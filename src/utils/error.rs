//! The `error` module defines the error types used within `chanhub`.
//!
//! Errors follow the fan-out engine's taxonomy:
//! - frame-level problems ([`FrameError`]) are transient: the offending frame
//!   is logged and dropped, the connection keeps reading;
//! - delivery problems ([`DeliveryError`]) are fatal for one connection only;
//! - collaborator problems ([`StoreError`]) are logged, with subscribe failing
//!   closed and message recording failing open.
//!
//! Nothing here is process-fatal except [`ServerError`], which only the binary
//! surfaces at startup.

use thiserror::Error;

/// Failure of an external collaborator (membership oracle, message store,
/// subscription directory).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("failed to encode or decode a stored record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("channel {0} does not exist")]
    UnknownChannel(i64),

    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("user {0} does not exist")]
    UnknownUser(i64),
}

/// A single inbound frame that could not be turned into an event.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("`{kind}` frame is missing required field `{field}`")]
    MissingField { kind: String, field: &'static str },

    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

/// Failure to hand a frame to one subscriber.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,

    #[error("outbound queue is full")]
    Backlogged,
}

/// The hub's event loop has stopped and no longer accepts events.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("hub is no longer accepting events")]
pub struct HubClosed;

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
