//! Persistence layer backed by `sled`
//!
//! Layout:
//! - `users`: user id -> JSON [`User`]
//! - `usernames`: username -> user id
//! - `channels`: channel id -> JSON [`Channel`]
//! - `channel_members`: `topic ++ principal` -> empty, for membership checks
//! - `member_channels`: `principal ++ topic` -> empty, for resuming a
//!   principal's subscriptions with a prefix scan
//! - `messages/<topic>`: `timestamp ++ sequence` -> JSON [`StoredMessage`].
//!   The sequence comes from sled's monotonic id generator, so iteration
//!   yields messages in the order they were stored, even within one
//!   millisecond.
//!
//! Ids are stored big-endian so keys group by their leading id.
//!
//! Retention options:
//! - `ttl_seconds`: messages older than this are removed during load
//! - `max_messages_per_topic`: when exceeded, the oldest messages are removed

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec, Tree};
use tracing::{debug, warn};

use super::{MembershipOracle, MessageStore, SubscriptionDirectory};
use crate::broker::event::{Principal, TopicId};
use crate::utils::error::StoreError;

const USERS: &str = "users";
const USERNAMES: &str = "usernames";
const CHANNELS: &str = "channels";
const CHANNEL_MEMBERS: &str = "channel_members";
const MEMBER_CHANNELS: &str = "member_channels";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Principal,
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelKind {
    Direct,
    Group,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: TopicId,
    pub name: String,
    pub kind: ChannelKind,
    /// Milliseconds since the UNIX epoch.
    pub created_at: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub topic: TopicId,
    pub sender: Principal,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    ttl_seconds: Option<i64>,
    max_messages_per_topic: Option<usize>,
}

fn pair_key(a: i64, b: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

fn trailing_id(key: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = key.get(8..16)?.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

fn leading_id(key: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

impl SledStore {
    /// Open or create a sled database at `path` with the given retention policy.
    pub fn open(
        path: &str,
        ttl_seconds: Option<i64>,
        max_messages_per_topic: Option<usize>,
    ) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            ttl_seconds,
            max_messages_per_topic,
        })
    }

    fn messages_tree(&self, topic: TopicId) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(format!("messages/{topic}"))?)
    }

    fn next_id(&self) -> Result<i64, StoreError> {
        i64::try_from(self.db.generate_id()? + 1)
            .map_err(|_| StoreError::InvalidChannel("id space exhausted".to_string()))
    }

    /// Register a user. Usernames are trimmed and must be unique.
    pub fn create_user(&self, username: &str) -> Result<User, StoreError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::InvalidUser("username must not be empty".to_string()));
        }

        let id = self.next_id()?;
        let claimed = self.db.open_tree(USERNAMES)?.compare_and_swap(
            username.as_bytes(),
            None as Option<&[u8]>,
            Some(&id.to_be_bytes()[..]),
        )?;
        if claimed.is_err() {
            return Err(StoreError::InvalidUser(format!(
                "username `{username}` is already taken"
            )));
        }

        let user = User {
            id,
            username: username.to_string(),
        };
        self.db
            .open_tree(USERS)?
            .insert(id.to_be_bytes(), serde_json::to_vec(&user)?)?;

        debug!(principal = id, "user created");
        Ok(user)
    }

    pub fn user(&self, id: Principal) -> Result<Option<User>, StoreError> {
        match self.db.open_tree(USERS)?.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let Some(raw) = self.db.open_tree(USERNAMES)?.get(username.trim().as_bytes())? else {
            return Ok(None);
        };
        match leading_id(&raw) {
            Some(id) => self.user(id),
            None => Ok(None),
        }
    }

    /// Fail with [`StoreError::UnknownUser`] on the first principal that was
    /// never registered.
    fn ensure_users(&self, principals: &[Principal]) -> Result<(), StoreError> {
        let users = self.db.open_tree(USERS)?;
        for &principal in principals {
            if !users.contains_key(principal.to_be_bytes())? {
                return Err(StoreError::UnknownUser(principal));
            }
        }
        Ok(())
    }

    /// Create a channel and add its initial members.
    ///
    /// A direct channel joins exactly two members and is always named
    /// `direct`; a group channel needs a name and at least two members.
    pub fn create_channel(
        &self,
        name: &str,
        kind: ChannelKind,
        members: &[Principal],
    ) -> Result<Channel, StoreError> {
        let name = match kind {
            ChannelKind::Direct if members.len() != 2 => {
                return Err(StoreError::InvalidChannel(
                    "a direct channel requires exactly two members".to_string(),
                ));
            }
            ChannelKind::Direct => "direct".to_string(),
            ChannelKind::Group if name.trim().is_empty() || members.len() < 2 => {
                return Err(StoreError::InvalidChannel(
                    "a group channel requires a name and at least two members".to_string(),
                ));
            }
            ChannelKind::Group => name.trim().to_string(),
        };

        self.ensure_users(members)?;

        let id = self.next_id()?;
        let channel = Channel {
            id,
            name,
            kind,
            created_at: Utc::now().timestamp_millis(),
        };

        self.db
            .open_tree(CHANNELS)?
            .insert(id.to_be_bytes(), serde_json::to_vec(&channel)?)?;
        self.add_members(id, members)?;

        debug!(topic = id, kind = ?kind, members = members.len(), "channel created");
        Ok(channel)
    }

    /// Add registered users to an existing channel. Adding a member twice is
    /// a no-op. Nothing is written unless every principal is a known user.
    pub fn add_members(&self, topic: TopicId, principals: &[Principal]) -> Result<(), StoreError> {
        if self.channel(topic)?.is_none() {
            return Err(StoreError::UnknownChannel(topic));
        }
        self.ensure_users(principals)?;

        let by_channel = self.db.open_tree(CHANNEL_MEMBERS)?;
        let by_member = self.db.open_tree(MEMBER_CHANNELS)?;
        for &principal in principals {
            by_channel.insert(pair_key(topic, principal), IVec::default())?;
            by_member.insert(pair_key(principal, topic), IVec::default())?;
        }
        Ok(())
    }

    pub fn channel(&self, topic: TopicId) -> Result<Option<Channel>, StoreError> {
        match self.db.open_tree(CHANNELS)?.get(topic.to_be_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Channels a principal belongs to, newest first.
    pub fn channels_for(&self, principal: Principal) -> Result<Vec<Channel>, StoreError> {
        let mut channels = Vec::new();
        for topic in self.topics_for(principal)? {
            if let Some(channel) = self.channel(topic)? {
                channels.push(channel);
            }
        }
        channels.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(channels)
    }

    /// Store a message in the topic's tree, then trim to the retention cap.
    pub fn store_message(
        &self,
        topic: TopicId,
        sender: Principal,
        content: &str,
    ) -> Result<(), StoreError> {
        let msg = StoredMessage {
            topic,
            sender,
            content: content.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };

        let tree = self.messages_tree(topic)?;
        let key = pair_key(msg.timestamp, self.next_id()?);
        tree.insert(key, serde_json::to_vec(&msg)?)?;

        if let Some(max) = self.max_messages_per_topic {
            let total_messages = tree.len();
            if total_messages > max {
                let excess = total_messages - max;
                let keys_to_delete: Vec<_> = tree
                    .iter()
                    .take(excess)
                    .filter_map(|entry| entry.ok().map(|(k, _)| k))
                    .collect();

                for key in keys_to_delete {
                    tree.remove(key)?;
                }
            }
        }
        Ok(())
    }

    /// Load a topic's messages in chronological order, honoring the TTL.
    pub fn load_messages(&self, topic: TopicId) -> Result<Vec<StoredMessage>, StoreError> {
        self.cleanup_old_messages(topic)?;
        let tree = self.messages_tree(topic)?;

        let mut messages = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            match serde_json::from_slice(&value) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!(topic, error = %e, "skipping undecodable stored message"),
            }
        }
        Ok(messages)
    }

    /// Remove messages older than the TTL for a single topic.
    fn cleanup_old_messages(&self, topic: TopicId) -> Result<(), StoreError> {
        let Some(ttl) = self.ttl_seconds else {
            return Ok(());
        };
        let expiry_time = Utc::now().timestamp_millis() - ttl * 1000;

        let tree = self.messages_tree(topic)?;
        let old_keys: Vec<_> = tree
            .iter()
            .filter_map(|res| res.ok())
            .filter_map(|(key_bytes, _)| {
                let ts = leading_id(&key_bytes)?;
                (ts < expiry_time).then_some(key_bytes)
            })
            .collect();

        for key in old_keys {
            tree.remove(key)?;
        }
        Ok(())
    }
}

impl MembershipOracle for SledStore {
    fn is_member(&self, topic: TopicId, principal: Principal) -> Result<bool, StoreError> {
        Ok(self
            .db
            .open_tree(CHANNEL_MEMBERS)?
            .contains_key(pair_key(topic, principal))?)
    }
}

impl MessageStore for SledStore {
    fn record(&self, topic: TopicId, principal: Principal, content: &str) -> Result<(), StoreError> {
        self.store_message(topic, principal, content)
    }
}

impl SubscriptionDirectory for SledStore {
    fn topics_for(&self, principal: Principal) -> Result<Vec<TopicId>, StoreError> {
        let tree = self.db.open_tree(MEMBER_CHANNELS)?;
        let mut topics = Vec::new();
        for entry in tree.scan_prefix(principal.to_be_bytes()) {
            let (key, _) = entry?;
            if let Some(topic) = trailing_id(&key) {
                topics.push(topic);
            }
        }
        Ok(topics)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("max_messages_per_topic", &self.max_messages_per_topic)
            .finish()
    }
}
