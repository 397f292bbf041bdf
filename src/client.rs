//! Client (connection adapter)
//!
//! A `Client` is the room's view of one connection: an identifier and the
//! sending half of a bounded outbound queue. The two loops below own the
//! socket halves; neither of them ever closes the queue, only the room's
//! leave path does.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::message::Event;
use crate::room::Room;
use crate::types::ClientId;

/// What a broadcast does when a member's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlowConsumerPolicy {
    /// Wait for space. A stalled member stalls the whole room's fan-out.
    #[default]
    Block,
    /// Drop the event for that member only and count it.
    DropNewest,
}

/// Result of handing one event to one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped,
    /// The member's writer has stopped; it will leave shortly.
    Gone,
}

/// Room membership entry for one connection
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Participant this connection belongs to
    pub participant_id: String,
    /// Room → connection event queue
    outbound: mpsc::Sender<Event>,
    /// Events discarded under `DropNewest`
    dropped: u64,
}

impl Client {
    /// Create a new client feeding the given outbound queue
    pub fn new(participant_id: impl Into<String>, outbound: mpsc::Sender<Event>) -> Self {
        Self {
            id: ClientId::new(),
            participant_id: participant_id.into(),
            outbound,
            dropped: 0,
        }
    }

    /// Queue an event for this connection
    pub async fn deliver(&mut self, event: Event, policy: SlowConsumerPolicy) -> Delivery {
        match policy {
            SlowConsumerPolicy::Block => match self.outbound.send(event).await {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Gone,
            },
            SlowConsumerPolicy::DropNewest => match self.outbound.try_send(event) {
                Ok(()) => Delivery::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped += 1;
                    Delivery::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
            },
        }
    }

    /// Number of events dropped for this client so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the outbound queue
    ///
    /// Consumes the client, so it can only happen once. The writer drains
    /// what is already queued and then closes the socket.
    pub(crate) fn close(self) {
        debug!(
            "Closing queue for client {} ({} dropped events)",
            self.id, self.dropped
        );
    }
}

/// Inbound loop: socket frames → `Room::handle_event`
///
/// Returns when the peer closes, the socket errors, the connection goes
/// idle, or a frame cannot be decoded.
pub(crate) async fn read_frames<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    room: &Room,
    client_id: ClientId,
    idle_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                info!("Client {} idle for {:?}, disconnecting", client_id, idle_timeout);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!("Client {} connection closed", client_id)
                    }
                    e => warn!("WebSocket error for {}: {}", client_id, e),
                }
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let decoded = match frame {
            Message::Text(text) => Event::from_json(&text),
            Message::Binary(bytes) => Event::from_slice(&bytes),
            Message::Close(_) => {
                debug!("Client {} sent close frame", client_id);
                break;
            }
            // Ping, Pong and raw frames only prove liveness
            _ => continue,
        };

        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                warn!("Undecodable frame from {}: {}", client_id, e);
                break;
            }
        };

        match room.handle_event(event, client_id).await {
            Ok(()) => {}
            Err(e @ ChatError::Decode { .. }) => {
                warn!("Dropping client {}: {}", client_id, e);
                break;
            }
            Err(ChatError::RoomClosed) => break,
            Err(e) => error!("Error handling event from {}: {}", client_id, e),
        }
    }
    debug!("Read loop ended for {}", client_id);
}

/// Outbound loop: queued events → socket frames, plus periodic pings
///
/// Returns when the queue is closed, `shutdown` fires, or a write fails or
/// takes longer than `write_timeout`. The queue receiver is gone once this
/// returns, so a room waiting on this client's full queue moves on.
pub(crate) async fn write_frames<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Event>,
    mut shutdown: oneshot::Receiver<()>,
    client_id: ClientId,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let frame = tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event.to_json() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        error!("Failed to serialize event for {}: {}", client_id, e);
                        continue;
                    }
                }
            }
            _ = ping.tick() => Message::Ping(Default::default()),
            _ = &mut shutdown => break,
        };

        tokio::select! {
            sent = timeout(write_timeout, sink.send(frame)) => match sent {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("Write to {} failed, ending write loop: {}", client_id, e);
                    return;
                }
                Err(_) => {
                    warn!("Write to {} stalled for {:?}, ending write loop", client_id, write_timeout);
                    return;
                }
            },
            _ = &mut shutdown => break,
        }
    }

    drop(outbound);
    debug!("Closing socket for {}", client_id);
    let _ = timeout(write_timeout, sink.close()).await;
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;
    use crate::message::EventType;

    async fn socket_pair(buffer: usize) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(buffer);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    fn event(n: i64) -> Event {
        Event::new(EventType::NewEmojiReact, &serde_json::json!({ "messageId": n })).unwrap()
    }

    #[tokio::test]
    async fn test_client_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let client = Client::new("P1", tx);

        assert_eq!(client.participant_id, "P1");
        assert_eq!(client.dropped(), 0);
    }

    #[tokio::test]
    async fn test_drop_newest_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut client = Client::new("P1", tx);

        assert_eq!(
            client.deliver(event(1), SlowConsumerPolicy::DropNewest).await,
            Delivery::Queued
        );
        assert_eq!(
            client.deliver(event(2), SlowConsumerPolicy::DropNewest).await,
            Delivery::Dropped
        );
        assert_eq!(client.dropped(), 1);

        let first = rx.recv().await.unwrap();
        assert!(first.payload.get().contains("\"messageId\":1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_block_waits_for_space() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut client = Client::new("P1", tx);
        client.deliver(event(1), SlowConsumerPolicy::Block).await;

        let blocked = timeout(
            Duration::from_millis(50),
            client.deliver(event(2), SlowConsumerPolicy::Block),
        )
        .await;
        assert!(blocked.is_err(), "send into a full queue should wait");

        rx.recv().await.unwrap();
        let delivered = timeout(
            Duration::from_millis(250),
            client.deliver(event(3), SlowConsumerPolicy::Block),
        )
        .await
        .unwrap();
        assert_eq!(delivered, Delivery::Queued);
    }

    #[tokio::test]
    async fn test_deliver_to_gone_writer() {
        let (tx, rx) = mpsc::channel(4);
        let mut client = Client::new("P1", tx);
        drop(rx);

        assert_eq!(
            client.deliver(event(1), SlowConsumerPolicy::Block).await,
            Delivery::Gone
        );
        assert_eq!(
            client.deliver(event(1), SlowConsumerPolicy::DropNewest).await,
            Delivery::Gone
        );
    }

    #[tokio::test]
    async fn test_writer_pings_idle_connection() {
        let (server, mut peer) = socket_pair(4096).await;
        let (sink, _stream) = server.split();
        let (_tx, rx) = mpsc::channel(4);
        let (_stop, shutdown) = oneshot::channel();

        let writer = tokio::spawn(write_frames(
            sink,
            rx,
            shutdown,
            ClientId::new(),
            Duration::from_millis(50),
            Duration::from_secs(1),
        ));

        let frame = timeout(Duration::from_millis(500), peer.next())
            .await
            .expect("ping within timeout")
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Message::Ping(_)));
        writer.abort();
    }

    #[tokio::test]
    async fn test_writer_ends_when_peer_is_gone() {
        let (server, peer) = socket_pair(4096).await;
        let (sink, _stream) = server.split();
        let (tx, rx) = mpsc::channel(4);
        let (_stop, shutdown) = oneshot::channel();
        drop(peer);

        let writer = tokio::spawn(write_frames(
            sink,
            rx,
            shutdown,
            ClientId::new(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));
        tx.send(event(1)).await.unwrap();

        timeout(Duration::from_millis(500), writer)
            .await
            .expect("write loop should end")
            .unwrap();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_writer_gives_up_on_stalled_peer() {
        // The peer never reads, so the tiny pipe fills up.
        let (server, _peer) = socket_pair(64).await;
        let (sink, _stream) = server.split();
        let (tx, rx) = mpsc::channel(64);
        let (_stop, shutdown) = oneshot::channel();

        let writer = tokio::spawn(write_frames(
            sink,
            rx,
            shutdown,
            ClientId::new(),
            Duration::from_secs(60),
            Duration::from_millis(100),
        ));
        for n in 0..8 {
            let _ = tx.send(event(n)).await;
        }

        timeout(Duration::from_secs(2), writer)
            .await
            .expect("write loop should give up")
            .unwrap();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_releases_queue() {
        let (server, _peer) = socket_pair(64).await;
        let (sink, _stream) = server.split();
        let (tx, rx) = mpsc::channel(1);
        let (stop, shutdown) = oneshot::channel();

        let writer = tokio::spawn(write_frames(
            sink,
            rx,
            shutdown,
            ClientId::new(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        stop.send(()).unwrap();

        timeout(Duration::from_secs(2), writer)
            .await
            .expect("write loop should stop")
            .unwrap();
        assert!(tx.is_closed());
    }
}
