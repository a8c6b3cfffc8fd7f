//! The `client` module defines the server-side handle of one connected peer.
//!
//! A [`Connection`] pairs the peer's principal with the sending half of its
//! bounded outbound queue and a shutdown token. The registry holds clones of
//! it to deliver broadcast frames; the transport owns the other ends.

pub mod connection;
pub use connection::{Connection, ConnectionId};

#[cfg(test)]
mod tests;
