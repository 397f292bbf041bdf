//! Error types for the messenger
//!
//! Separates transport failures (fatal to one connection) from room and
//! handler errors (logged, the connection stays open) and from the
//! collaborator's storage errors. Uses thiserror for ergonomic definitions.

use thiserror::Error;

use crate::message::EventType;

/// Transport-level errors
///
/// Raised while serving a socket or starting the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// HTTP connection error (fatal to that connection)
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Room, registry and event handler errors
#[derive(Debug, Error)]
pub enum ChatError {
    /// No handler is registered for the inbound event type
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(EventType),

    /// The participant is not part of the conversation
    #[error("unauthorized")]
    Unauthorized,

    /// Malformed payload for the declared event type (fatal to the connection)
    #[error("bad payload for {kind} event: {source}")]
    Decode {
        kind: EventType,
        #[source]
        source: serde_json::Error,
    },

    /// Outbound payload could not be encoded
    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Conversation collaborator failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The room's control loop is no longer running
    #[error("room closed")]
    RoomClosed,
}

/// Errors reported by the conversation collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Rejections of a room request, answered with 400
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Missing required parameter pid")]
    MissingParticipant,

    #[error("Missing Room ID")]
    MissingRoom,

    #[error("Invalid Room ID")]
    InvalidRoom,

    #[error("Expected WebSocket upgrade")]
    NotWebSocket,
}

/// Invalid configuration value
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
