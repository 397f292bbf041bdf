//! Room registry
//!
//! Maps each conversation to its running room. Lookup, authorization and
//! creation happen inside one critical section so concurrent connections for
//! the same new conversation end up in the same room.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::room::Room;
use crate::store::ConversationStore;
use crate::types::RoomKey;

/// Registered rooms, keyed by conversation
pub(crate) type Registry = Mutex<HashMap<RoomKey, Room>>;

/// Process-wide directory of conversation rooms
#[derive(Clone)]
pub struct Manager {
    rooms: Arc<Registry>,
    store: Arc<dyn ConversationStore>,
    config: Arc<ServerConfig>,
}

impl Manager {
    pub fn new(store: Arc<dyn ConversationStore>, config: Arc<ServerConfig>) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            store,
            config,
        }
    }

    /// Return the room for a conversation, starting it if needed
    ///
    /// The conversation is created through the store when it does not exist
    /// yet. Fails with `Unauthorized` unless `participant_id` is one of its
    /// two participants.
    pub async fn get_or_create_room(
        &self,
        identifier: Uuid,
        participant_id: &str,
    ) -> Result<Room, ChatError> {
        let mut rooms = self.rooms.lock().await;

        let conversation = self
            .store
            .get_or_create_conversation(identifier, participant_id)
            .await?;

        if !conversation.has_participant(participant_id) {
            warn!(
                "Participant {} is not a member of conversation {}",
                participant_id, conversation.id
            );
            return Err(ChatError::Unauthorized);
        }

        let key = RoomKey::new(conversation.id, conversation.identifier);
        if let Some(room) = rooms.get(&key) {
            debug!("Reusing {}", key);
            return Ok(room.clone());
        }

        let room = Room::spawn(
            key,
            self.store.clone(),
            self.config.clone(),
            Arc::downgrade(&self.rooms),
        );
        rooms.insert(key, room.clone());
        info!("Created {} (total rooms: {})", key, rooms.len());
        Ok(room)
    }

    /// Number of registered rooms
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}
