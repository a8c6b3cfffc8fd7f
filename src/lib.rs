//! # ChanHub
//!
//! `chanhub` delivers chat messages in real time to every connection
//! subscribed to a channel. Clients speak JSON over WebSockets; a single hub
//! task owns the channel membership map and fans each message out to the
//! current subscribers.
//!
//! ## Core Modules
//!
//! - `broker`: the membership registry and the hub task that serializes
//!   subscribe, unsubscribe and broadcast events.
//! - `client`: the server-side connection handle and its outbound delivery.
//! - `config`: loading and merging server configuration.
//! - `persistence`: membership, message history and subscription lookups,
//!   with a `sled`-backed implementation.
//! - `ratelimit`: per-origin token buckets.
//! - `transport`: wire frames, the per-connection inbound pump and the
//!   WebSocket server.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod ratelimit;
pub mod transport;
pub mod utils;
