//! Wire frames
//!
//! Inbound frames are JSON objects `{kind, topic, text}`. Older clients send
//! `type` and `channelID`, which are accepted as aliases. Which fields are
//! required depends on `kind`, so frames are first read leniently and then
//! checked per kind; unknown fields are ignored.
//!
//! Outbound frames are `{"kind":"message","topic":..,"senderPrincipal":..,"content":..}`.

use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::event::{Principal, TopicId};
use crate::utils::error::FrameError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe { topic: TopicId },
    Unsubscribe { topic: TopicId },
    Message { topic: TopicId, text: String },
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(alias = "type")]
    kind: String,
    #[serde(default, alias = "channelID")]
    topic: Option<TopicId>,
    #[serde(default)]
    text: Option<String>,
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text)?;

        let topic = |kind: &str| {
            raw.topic.ok_or_else(|| FrameError::MissingField {
                kind: kind.to_string(),
                field: "topic",
            })
        };

        match raw.kind.as_str() {
            "subscribe" => Ok(ClientMessage::Subscribe {
                topic: topic("subscribe")?,
            }),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe {
                topic: topic("unsubscribe")?,
            }),
            "message" => {
                let topic = topic("message")?;
                let text = raw.text.clone().ok_or_else(|| FrameError::MissingField {
                    kind: "message".to_string(),
                    field: "text",
                })?;
                Ok(ClientMessage::Message { topic, text })
            }
            _ => Ok(ClientMessage::Unknown {
                kind: raw.kind.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message {
        topic: TopicId,
        #[serde(rename = "senderPrincipal")]
        sender_principal: Principal,
        content: String,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<WsMessage, serde_json::Error> {
        Ok(WsMessage::text(serde_json::to_string(self)?))
    }
}
