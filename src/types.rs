//! Basic type definitions for the messenger
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: UUID-based identifier for one connection
//! - `RoomKey`: conversation identity used as the room registry key

use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// One participant may hold several clients (one per device or tab),
/// so this identifies the connection, not the person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a conversation room
///
/// Combines the conversation's numeric ID with its public UUID.
/// Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub conversation_id: i64,
    pub identifier: Uuid,
}

impl RoomKey {
    pub fn new(conversation_id: i64, identifier: Uuid) -> Self {
        Self {
            conversation_id,
            identifier,
        }
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "room:{}:{}", self.identifier, self.conversation_id)
    }
}
