//! Pet conversation messenger
//!
//! A WebSocket hub where a pet owner and whoever found (or is asking about)
//! the pet chat in real time. Each conversation gets one room; late joiners
//! are caught up with recent history.
//!
//! # Features
//! - One room per conversation, created on first use
//! - Participant authorization before the WebSocket upgrade
//! - Chat messages and emoji reactions, persisted through a store
//! - History replay on join
//! - Ping/idle-timeout liveness and idle room eviction
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Manager` is the registry of rooms, guarded by a single mutex
//! - Each `Room` is an actor that alone owns its member list
//! - Each connection runs a read loop (dispatching events) and a write loop
//!   (draining its outbound queue)
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use paws_messenger::{server, Manager, MemoryStore, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(ServerConfig::default());
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     let manager = Manager::new(Arc::new(MemoryStore::new()), config.clone());
//!     server::run(listener, manager, config).await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
mod events;
pub mod handler;
pub mod manager;
pub mod message;
pub mod room;
pub mod server;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, SlowConsumerPolicy};
pub use config::ServerConfig;
pub use error::{AppError, ChatError, ConfigError, RequestError, StoreError};
pub use handler::handle_connection;
pub use manager::Manager;
pub use message::{emoji_for, Event, EventType};
pub use room::Room;
pub use store::{Conversation, ConversationStore, MemoryStore, StoredMessage};
pub use types::{ClientId, RoomKey};
