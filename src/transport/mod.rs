//! The `transport` module connects WebSocket peers to the hub.
//!
//! It defines the wire frames exchanged with clients, the per-connection
//! inbound pump that turns frames into hub events, and the WebSocket server
//! that performs the handshake and owns each connection's socket.

pub mod message;
pub mod pump;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use pump::InboundPump;
pub use websocket::{ServerContext, serve, start_websocket_server};
