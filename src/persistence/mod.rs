//! The `persistence` module defines the collaborators the fan-out engine
//! consults and a `sled`-backed implementation of them.
//!
//! The engine only depends on the three traits below, so tests substitute
//! in-memory doubles and deployments can swap the backend.

pub mod sled_store;

pub use sled_store::{Channel, ChannelKind, SledStore, StoredMessage, User};

use crate::broker::event::{Principal, TopicId};
use crate::utils::error::StoreError;

/// Answers whether a principal may join a topic.
pub trait MembershipOracle: Send + Sync {
    fn is_member(&self, topic: TopicId, principal: Principal) -> Result<bool, StoreError>;
}

/// Durable record of published messages.
pub trait MessageStore: Send + Sync {
    fn record(&self, topic: TopicId, principal: Principal, content: &str) -> Result<(), StoreError>;
}

/// Topics a principal belonged to, used to resume subscriptions on connect.
pub trait SubscriptionDirectory: Send + Sync {
    fn topics_for(&self, principal: Principal) -> Result<Vec<TopicId>, StoreError>;
}

/// Everything an inbound pump needs from storage.
pub trait ChatStore: MembershipOracle + MessageStore + SubscriptionDirectory {}

impl<T> ChatStore for T where T: MembershipOracle + MessageStore + SubscriptionDirectory {}
