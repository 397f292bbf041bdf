//! Event handlers
//!
//! Run on the originating connection's read task. Each handler persists
//! through the store, then broadcasts through the room's control loop, so
//! membership is never touched outside the loop.

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::error::ChatError;
use crate::message::{emoji_for, EmojiReact, Event, EventType, NewEmojiReact, NewMessage, SendMessage};
use crate::room::Room;
use crate::store::StoredMessage;
use crate::types::ClientId;

/// `send_message` → persist → `new_message` to every member
///
/// A failed persist is logged and the message still goes out with ID 0.
pub(crate) async fn send_message(
    room: &Room,
    event: &Event,
    origin: ClientId,
) -> Result<(), ChatError> {
    let incoming: SendMessage = event.decode()?;

    let mut outgoing = NewMessage {
        text: incoming.text,
        sender_id: incoming.sender_id,
        id: 0,
        timestamp: Utc::now(),
        emoji: None,
    };

    match room
        .store()
        .create_message(room.key().conversation_id, &outgoing.sender_id, &outgoing.text)
        .await
    {
        Ok(stored) => {
            outgoing.id = stored.id;
            outgoing.timestamp = stored.created_at;
        }
        Err(e) => error!("Error persisting message from {}: {}", origin, e),
    }

    room.broadcast(Event::new(EventType::NewMessage, &outgoing)?)
        .await
}

/// `emoji_react` → update reaction → `new_emoji_react` to every member
///
/// An empty key clears the reaction.
pub(crate) async fn emoji_react(
    room: &Room,
    event: &Event,
    origin: ClientId,
) -> Result<(), ChatError> {
    let react: EmojiReact = event.decode()?;
    debug!("Emoji from {}: {:?}", origin, react);

    let conversation_id = room.key().conversation_id;
    if react.conversation_id != conversation_id {
        warn!(
            "Client {} reacted in conversation {} from room {}",
            origin,
            react.conversation_id,
            room.key()
        );
        return Err(ChatError::Unauthorized);
    }

    let key = Some(react.emoji_key.as_str()).filter(|k| !k.is_empty());
    if let Err(e) = room
        .store()
        .set_message_reaction(conversation_id, react.message_id, key)
        .await
    {
        error!("Error updating reaction on message {}: {}", react.message_id, e);
    }

    let outgoing = NewEmojiReact {
        message_id: react.message_id,
        emoji: emoji_for(&react.emoji_key).map(str::to_string),
    };
    room.broadcast(Event::new(EventType::NewEmojiReact, &outgoing)?)
        .await
}

/// Wrap a stored message as the `new_message` a joining client replays
pub(crate) fn history_event(message: &StoredMessage) -> Result<Event, ChatError> {
    let payload = NewMessage {
        text: message.text.clone(),
        sender_id: message.sender_id.clone(),
        id: message.id,
        timestamp: message.created_at,
        emoji: message
            .emoji_reaction
            .as_deref()
            .and_then(emoji_for)
            .map(str::to_string),
    };
    Event::new(EventType::NewMessage, &payload)
}
