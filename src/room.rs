//! Conversation room
//!
//! Each room is an actor: one task owns the member list and processes
//! join, leave and broadcast commands in the order they arrive. `Room` is
//! the cheap, cloneable handle everyone else uses to talk to it.

use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::{self, Client, Delivery};
use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::events;
use crate::manager::Registry;
use crate::message::{Event, EventType};
use crate::store::ConversationStore;
use crate::types::{ClientId, RoomKey};

/// Commands processed by a room's control loop
#[derive(Debug)]
enum RoomCommand {
    /// Add a member, then replay recent history to it
    Join {
        client: Client,
        joined: oneshot::Sender<()>,
    },
    /// Remove a member and close its queue
    Leave { client_id: ClientId },
    /// Deliver an event to every current member
    Broadcast { event: Event },
    /// Current member IDs
    Members {
        reply: oneshot::Sender<Vec<ClientId>>,
    },
}

struct Shared {
    key: RoomKey,
    commands: mpsc::Sender<RoomCommand>,
    store: Arc<dyn ConversationStore>,
    config: Arc<ServerConfig>,
}

/// Handle to a running room
#[derive(Clone)]
pub struct Room {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room").field("key", &self.shared.key).finish()
    }
}

impl Room {
    /// Start a room's control loop and return its handle
    ///
    /// `registry` is where the room unregisters itself when it retires.
    pub(crate) fn spawn(
        key: RoomKey,
        store: Arc<dyn ConversationStore>,
        config: Arc<ServerConfig>,
        registry: Weak<Registry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.room_command_capacity);
        let room = Room {
            shared: Arc::new(Shared {
                key,
                commands: tx,
                store: store.clone(),
                config: config.clone(),
            }),
        };

        let actor = RoomActor {
            key,
            clients: Vec::new(),
            commands: rx,
            store,
            config,
            registry,
            handle: Arc::downgrade(&room.shared),
        };
        tokio::spawn(actor.run().instrument(info_span!("room", key = %key)));

        room
    }

    pub fn key(&self) -> RoomKey {
        self.shared.key
    }

    /// Whether two handles refer to the same running room
    pub fn ptr_eq(a: &Room, b: &Room) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    pub(crate) fn store(&self) -> &dyn ConversationStore {
        self.shared.store.as_ref()
    }

    fn is_handle_of(&self, handle: &Weak<Shared>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.shared), handle.as_ptr())
    }

    async fn send(&self, command: RoomCommand) -> Result<(), ChatError> {
        self.shared
            .commands
            .send(command)
            .await
            .map_err(|_| ChatError::RoomClosed)
    }

    /// Add a client to the membership set
    ///
    /// Resolves once the client is a member; history replay follows on the
    /// client's own queue.
    pub async fn join(&self, client: Client) -> Result<(), ChatError> {
        let (joined, ack) = oneshot::channel();
        self.send(RoomCommand::Join { client, joined }).await?;
        ack.await.map_err(|_| ChatError::RoomClosed)
    }

    /// Remove a client; a no-op for non-members
    pub async fn leave(&self, client_id: ClientId) -> Result<(), ChatError> {
        self.send(RoomCommand::Leave { client_id }).await
    }

    /// Fan an event out to every member at the moment the loop handles it
    pub async fn broadcast(&self, event: Event) -> Result<(), ChatError> {
        self.send(RoomCommand::Broadcast { event }).await
    }

    pub async fn members(&self) -> Result<Vec<ClientId>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Members { reply }).await?;
        rx.await.map_err(|_| ChatError::RoomClosed)
    }

    /// Dispatch an inbound event to its handler
    pub async fn handle_event(&self, event: Event, origin: ClientId) -> Result<(), ChatError> {
        match event.kind {
            EventType::SendMessage => events::send_message(self, &event, origin).await,
            EventType::EmojiReact => events::emoji_react(self, &event, origin).await,
            kind => Err(ChatError::UnsupportedEventType(kind)),
        }
    }

    /// Run one upgraded connection as a member of this room
    ///
    /// Blocks until the connection ends. The read loop runs on the calling
    /// task, the write loop on its own.
    pub async fn serve_connection<S>(
        &self,
        socket: WebSocketStream<S>,
        participant_id: &str,
    ) -> Result<(), ChatError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.shared.config;
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel(config.outbound_capacity);
        let (stop, shutdown) = oneshot::channel();
        let client = Client::new(participant_id, tx);
        let client_id = client.id;

        let writer = tokio::spawn(client::write_frames(
            sink,
            rx,
            shutdown,
            client_id,
            config.ping_interval,
            config.write_timeout,
        ));

        // On failure the client is dropped with the command and `stop` with
        // this frame, so the writer shuts the socket.
        self.join(client).await?;
        info!(
            "Client {} ({}) joined {}",
            client_id,
            participant_id,
            self.key()
        );

        client::read_frames(stream, self, client_id, config.idle_timeout).await;

        // A fan-out blocked on this client's full queue would hold the leave
        // back, so the writer drops the queue first.
        let _ = stop.send(());
        if let Err(e) = writer.await {
            warn!("Writer task for {} failed: {}", client_id, e);
        }
        if self.leave(client_id).await.is_err() {
            debug!("Room {} already closed when {} left", self.key(), client_id);
        }

        info!("Client {} left {}", client_id, self.key());
        Ok(())
    }
}

/// State owned by a room's control loop
struct RoomActor {
    key: RoomKey,
    /// Members in join order
    clients: Vec<Client>,
    commands: mpsc::Receiver<RoomCommand>,
    store: Arc<dyn ConversationStore>,
    config: Arc<ServerConfig>,
    registry: Weak<Registry>,
    /// The room's own handle, used to count outstanding clones
    handle: Weak<Shared>,
}

impl RoomActor {
    async fn run(mut self) {
        debug!("Room started");
        let mut retired = false;

        loop {
            let idle_after = match self.config.room_idle_timeout {
                Some(after) if self.clients.is_empty() && !retired => Some(after),
                _ => None,
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = sleep(idle_after.unwrap_or_default()), if idle_after.is_some() => {
                    retired = self.try_retire().await;
                }
            }
        }

        debug!("Room stopped");
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { client, joined } => {
                let client_id = client.id;
                debug!("Join {} ({})", client_id, client.participant_id);
                self.clients.push(client);
                let _ = joined.send(());
                self.replay_history(client_id).await;
            }
            RoomCommand::Leave { client_id } => {
                match self.clients.iter().position(|c| c.id == client_id) {
                    Some(index) => {
                        debug!("Leave {}", client_id);
                        self.clients.remove(index).close();
                    }
                    None => debug!("Leave for non-member {} ignored", client_id),
                }
            }
            RoomCommand::Broadcast { event } => self.fan_out(event).await,
            RoomCommand::Members { reply } => {
                let _ = reply.send(self.clients.iter().map(|c| c.id).collect());
            }
        }
    }

    async fn fan_out(&mut self, event: Event) {
        debug!("Broadcast {} to {} members", event.kind, self.clients.len());
        let policy = self.config.slow_consumer;
        for client in self.clients.iter_mut() {
            match client.deliver(event.clone(), policy).await {
                Delivery::Queued => {}
                Delivery::Dropped => warn!(
                    "Queue full for {}, dropped {} event ({} so far)",
                    client.id,
                    event.kind,
                    client.dropped()
                ),
                Delivery::Gone => debug!("Writer for {} gone, skipping", client.id),
            }
        }
    }

    /// Send recent messages, oldest first, to one member only
    async fn replay_history(&mut self, client_id: ClientId) {
        let messages = match self
            .store
            .recent_messages(self.key.conversation_id, self.config.history_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to load history for {}: {}", client_id, e);
                return;
            }
        };

        let policy = self.config.slow_consumer;
        let Some(client) = self.clients.iter_mut().find(|c| c.id == client_id) else {
            return;
        };
        for message in &messages {
            match events::history_event(message) {
                Ok(event) => {
                    if client.deliver(event, policy).await == Delivery::Gone {
                        return;
                    }
                }
                Err(e) => error!("Failed to encode message {}: {}", message.id, e),
            }
        }
    }

    /// Unregister an empty room nobody else holds a handle to
    ///
    /// Runs under the registry lock, so no new handle can be handed out
    /// between the check and the removal.
    async fn try_retire(&mut self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut rooms = registry.lock().await;

        let registered = rooms
            .get(&self.key)
            .is_some_and(|room| room.is_handle_of(&self.handle));
        if !registered || !self.clients.is_empty() || self.handle.strong_count() > 1 {
            return false;
        }

        rooms.remove(&self.key);
        info!("Room idle, retired");
        true
    }
}
