//! End-to-end tests over a real TCP listener

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use paws_messenger::{server, Manager, MemoryStore, ServerConfig};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (SocketAddr, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let pet = Uuid::new_v4();
    store.register_owner(pet, "P1");

    let config = Arc::new(ServerConfig::default());
    let manager = Manager::new(store, config.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run(listener, manager, config));
    (addr, pet)
}

async fn join(addr: SocketAddr, pet: Uuid, pid: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/room?pid={pid}&r={pet}"))
        .await
        .unwrap();
    socket
}

async fn next_event(socket: &mut Socket) -> Value {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send(socket: &mut Socket, event: Value) {
    socket.send(Message::Text(event.to_string())).await.unwrap();
}

fn rejected_status(result: Result<(Socket, tungstenite::handshake::client::Response), tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("connection was accepted"),
    }
}

#[tokio::test]
async fn test_both_participants_receive_message() {
    let (addr, pet) = start().await;

    let mut finder = join(addr, pet, "P2").await;
    send(
        &mut finder,
        json!({"type": "send_message", "payload": {"text": "found your dog", "senderId": "P2"}}),
    )
    .await;
    let first = next_event(&mut finder).await;
    assert_eq!(first["payload"]["text"], "found your dog");

    // Replay arrives once the owner is a member
    let mut owner = join(addr, pet, "P1").await;
    let replay = next_event(&mut owner).await;
    assert_eq!(replay["type"], "new_message");
    assert_eq!(replay["payload"]["id"], first["payload"]["id"]);

    send(
        &mut finder,
        json!({"type": "send_message", "payload": {"text": "hi", "senderId": "P2"}}),
    )
    .await;

    for socket in [&mut finder, &mut owner] {
        let event = next_event(socket).await;
        assert_eq!(event["type"], "new_message");
        assert_eq!(event["payload"]["text"], "hi");
        assert_eq!(event["payload"]["senderId"], "P2");
        assert!(event["payload"]["id"].as_i64().unwrap() > 0);
    }
}

#[tokio::test]
async fn test_reaction_reaches_both_participants() {
    let (addr, pet) = start().await;

    let mut finder = join(addr, pet, "P2").await;
    send(
        &mut finder,
        json!({"type": "send_message", "payload": {"text": "is this Rex?", "senderId": "P2"}}),
    )
    .await;
    let message_id = next_event(&mut finder).await["payload"]["id"].clone();

    let mut owner = join(addr, pet, "P1").await;
    next_event(&mut owner).await;

    send(
        &mut owner,
        json!({
            "type": "emoji_react",
            "payload": {"emojiKey": "thumbs-up", "conversationId": 1, "messageId": message_id}
        }),
    )
    .await;

    for socket in [&mut finder, &mut owner] {
        let event = next_event(socket).await;
        assert_eq!(event["type"], "new_emoji_react");
        assert_eq!(event["payload"]["messageId"], message_id);
        assert_eq!(event["payload"]["emoji"], "👍");
    }
}

#[tokio::test]
async fn test_each_finder_has_own_conversation() {
    let (addr, pet) = start().await;

    let mut first = join(addr, pet, "P2").await;
    let mut second = join(addr, pet, "P3").await;

    send(
        &mut second,
        json!({"type": "send_message", "payload": {"text": "I saw him too", "senderId": "P3"}}),
    )
    .await;
    assert_eq!(next_event(&mut second).await["payload"]["text"], "I saw him too");

    send(
        &mut first,
        json!({"type": "send_message", "payload": {"text": "he is with me", "senderId": "P2"}}),
    )
    .await;
    // The other finder's message never reaches this room.
    assert_eq!(next_event(&mut first).await["payload"]["text"], "he is with me");
}

#[tokio::test]
async fn test_owner_cannot_open_conversation() {
    let (addr, pet) = start().await;

    let status = rejected_status(connect_async(format!("ws://{addr}/room?pid=P1&r={pet}")).await);
    assert_eq!(status, 500);
}

#[tokio::test]
async fn test_bad_parameters_are_rejected() {
    let (addr, pet) = start().await;

    let missing_pid = connect_async(format!("ws://{addr}/room?r={pet}")).await;
    assert_eq!(rejected_status(missing_pid), 400);

    let missing_room = connect_async(format!("ws://{addr}/room?pid=P2")).await;
    assert_eq!(rejected_status(missing_room), 400);

    let invalid_room = connect_async(format!("ws://{addr}/room?pid=P2&r=rex")).await;
    assert_eq!(rejected_status(invalid_room), 400);
}

#[tokio::test]
async fn test_ping_endpoint() {
    let (addr, _) = start().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("pong"));
}
