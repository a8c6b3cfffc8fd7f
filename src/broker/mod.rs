//! The `broker` module is the in-process fan-out engine.
//!
//! - `event`: the Subscribe / Unsubscribe / Broadcast events and id types.
//! - `topic`: one topic's subscriber set and its fan-out.
//! - `registry`: the topic -> subscribers map and event application.
//! - `hub`: the task that owns the registry and serializes all events.

pub mod event;
pub mod hub;
pub mod registry;
pub mod topic;

pub use event::{BroadcastReport, Event, Principal, TopicId};
pub use hub::{Hub, HubHandle};
pub use registry::Registry;

#[cfg(test)]
mod tests;
