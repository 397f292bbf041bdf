//! Event protocol definitions
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}`. The payload
//! stays raw until the handler for its type decodes it into a typed struct.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::ChatError;

/// Event type tag carried in the envelope
///
/// Unrecognized tags decode to `Unknown` so that dispatch, not decoding,
/// rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Client → Server: post a chat message
    SendMessage,
    /// Server → Client: a message was posted (or replayed from history)
    NewMessage,
    /// Client → Server: set or clear a reaction
    EmojiReact,
    /// Server → Client: a reaction changed
    NewEmojiReact,
    /// Client → Server: typing indicator (no handler registered)
    Typing,
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SendMessage => "send_message",
            EventType::NewMessage => "new_message",
            EventType::EmojiReact => "emoji_react",
            EventType::NewEmojiReact => "new_emoji_react",
            EventType::Typing => "typing",
            EventType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope exchanged between clients and rooms
///
/// Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: Box<RawValue>,
}

impl Event {
    /// Build an outbound event from a typed payload
    pub fn new<T: Serialize>(kind: EventType, payload: &T) -> Result<Self, ChatError> {
        Ok(Self {
            kind,
            payload: serde_json::value::to_raw_value(payload)?,
        })
    }

    /// Parse a text frame into an envelope
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse a binary frame into an envelope
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the payload into the struct for this event's type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ChatError> {
        serde_json::from_str(self.payload.get()).map_err(|source| ChatError::Decode {
            kind: self.kind,
            source,
        })
    }
}

/// Payload of `send_message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub text: String,
    pub sender_id: String,
}

/// Payload of `new_message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub text: String,
    pub sender_id: String,
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub emoji: Option<String>,
}

/// Payload of `emoji_react`
///
/// An empty `emoji_key` clears the reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiReact {
    #[serde(default)]
    pub emoji_key: String,
    pub conversation_id: i64,
    pub message_id: i64,
}

/// Payload of `new_emoji_react`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmojiReact {
    pub message_id: i64,
    pub emoji: Option<String>,
}

/// Display form of a stored reaction key
///
/// Unrecognized and empty keys have no display emoji.
pub fn emoji_for(key: &str) -> Option<&'static str> {
    match key {
        "thumbs-up" => Some("👍"),
        "thumbs-down" => Some("👎"),
        "smiling-face" => Some("😊"),
        "laughing-face" => Some("😆"),
        "crying-face" => Some("😭"),
        _ => None,
    }
}
