//! Conversation collaborator
//!
//! Rooms never touch storage directly; they go through `ConversationStore`.
//! `MemoryStore` is the in-process implementation used by the binary and
//! the tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// A two-party conversation about one pet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub identifier: Uuid,
    /// The pet owner
    pub primary_participant_id: String,
    /// Whoever started the conversation
    pub secondary_participant_id: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.primary_participant_id == participant_id
            || self.secondary_participant_id == participant_id
    }
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: String,
    pub text: String,
    /// Raw reaction key, e.g. `thumbs-up`
    pub emoji_reaction: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Persistence and lookup operations consumed by the manager and rooms
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch the conversation about `identifier` that `participant_id` takes
    /// part in, creating it with `participant_id` as the secondary
    /// participant when none exists.
    async fn get_or_create_conversation(
        &self,
        identifier: Uuid,
        participant_id: &str,
    ) -> Result<Conversation, StoreError>;

    async fn create_message(
        &self,
        conversation_id: i64,
        sender_id: &str,
        text: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Set the reaction key on a message, or clear it with `None`.
    async fn set_message_reaction(
        &self,
        conversation_id: i64,
        message_id: i64,
        emoji_key: Option<&str>,
    ) -> Result<(), StoreError>;

    /// The newest `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    /// Pet identifier -> owner participant ID
    owners: HashMap<Uuid, String>,
    /// In creation order
    conversations: Vec<Conversation>,
    messages: HashMap<i64, Vec<StoredMessage>>,
    next_conversation_id: i64,
    next_message_id: i64,
}

/// In-memory `ConversationStore`
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the owner of the pet that `identifier` refers to.
    pub fn register_owner(&self, identifier: Uuid, owner_id: impl Into<String>) {
        self.lock().owners.insert(identifier, owner_id.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_or_create_conversation(
        &self,
        identifier: Uuid,
        participant_id: &str,
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.lock();
        // One conversation per pet and finder; the owner matches the first one.
        if let Some(conversation) = inner
            .conversations
            .iter()
            .find(|c| c.identifier == identifier && c.has_participant(participant_id))
        {
            return Ok(conversation.clone());
        }

        let owner = inner
            .owners
            .get(&identifier)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        // Conversations are always started by the other party.
        if owner == participant_id {
            return Err(StoreError::NotFound);
        }

        inner.next_conversation_id += 1;
        let conversation = Conversation {
            id: inner.next_conversation_id,
            identifier,
            primary_participant_id: owner,
            secondary_participant_id: participant_id.to_string(),
            created_at: Utc::now(),
        };
        inner.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        sender_id: &str,
        text: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut inner = self.lock();
        inner.next_message_id += 1;
        let message = StoredMessage {
            id: inner.next_message_id,
            conversation_id,
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            emoji_reaction: None,
            created_at: Utc::now(),
            read_at: None,
        };
        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn set_message_reaction(
        &self,
        conversation_id: i64,
        message_id: i64,
        emoji_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let message = inner
            .messages
            .get_mut(&conversation_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or(StoreError::NotFound)?;
        message.emoji_reaction = emoji_key.map(str::to_string);
        Ok(())
    }

    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.lock();
        let Some(messages) = inner.messages.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        // Stored in creation order already.
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}
