use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chanhub::broker::Hub;
use chanhub::config::Settings;
use chanhub::persistence::{ChannelKind, SledStore};
use chanhub::transport::{ServerContext, serve};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(settings: Settings) -> (SocketAddr, SledStore, TempDir) {
    let dir = tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap(), None, None).unwrap();
    let (hub, _task) = Hub::spawn(settings.broker.event_queue_capacity);
    let ctx = ServerContext::new(hub, Arc::new(store.clone()), &settings);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, ctx));
    (addr, store, dir)
}

fn generous_settings() -> Settings {
    let mut settings = Settings::default();
    settings.rate_limit.per_second = 1000;
    settings.rate_limit.burst = 1000;
    settings
}

async fn connect(addr: SocketAddr, user: i64) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/?user_id={user}"))
        .await
        .expect("client connect");
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame");
    match frame {
        Some(Ok(WsMessage::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn integration_channel_fan_out_end_to_end() {
    let (addr, store, _dir) = start_server(generous_settings()).await;
    let alice_id = store.create_user("alice").unwrap().id;
    let bob_id = store.create_user("bob").unwrap().id;
    let channel = store
        .create_channel("general", ChannelKind::Group, &[alice_id, bob_id])
        .unwrap();

    let mut alice = connect(addr, alice_id).await;
    let mut bob = connect(addr, bob_id).await;

    // Bob's own echo proves his subscription reached the hub.
    send(&mut bob, json!({ "kind": "subscribe", "topic": channel.id })).await;
    send(&mut bob, json!({ "kind": "message", "topic": channel.id, "text": "ready" })).await;
    assert_eq!(next_json(&mut bob).await["content"], "ready");

    send(
        &mut alice,
        json!({ "kind": "message", "topic": channel.id, "text": "hello world" }),
    )
    .await;

    let received = next_json(&mut bob).await;
    assert_eq!(
        received,
        json!({
            "kind": "message",
            "topic": channel.id,
            "senderPrincipal": alice_id,
            "content": "hello world",
        })
    );

    let history = store.load_messages(channel.id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(
        history
            .iter()
            .any(|m| m.sender == alice_id && m.content == "hello world")
    );
}

#[tokio::test]
async fn integration_non_member_receives_nothing() {
    let (addr, store, _dir) = start_server(generous_settings()).await;
    let alice_id = store.create_user("alice").unwrap().id;
    let bob_id = store.create_user("bob").unwrap().id;
    let eve_id = store.create_user("eve").unwrap().id;
    let channel = store
        .create_channel("", ChannelKind::Direct, &[alice_id, bob_id])
        .unwrap();

    let mut outsider = connect(addr, eve_id).await;
    send(&mut outsider, json!({ "kind": "subscribe", "topic": channel.id })).await;

    let mut member = connect(addr, alice_id).await;
    send(&mut member, json!({ "kind": "subscribe", "topic": channel.id })).await;
    send(&mut member, json!({ "kind": "message", "topic": channel.id, "text": "private" })).await;
    assert_eq!(next_json(&mut member).await["content"], "private");

    let nothing = tokio::time::timeout(Duration::from_millis(200), outsider.next()).await;
    assert!(nothing.is_err(), "outsider received {nothing:?}");
}

#[tokio::test]
async fn integration_handshake_requires_user_id() {
    let (addr, _store, _dir) = start_server(generous_settings()).await;

    match connect_async(format!("ws://{addr}/")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 400),
        other => panic!("expected an HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn integration_handshake_refused_at_capacity() {
    let mut settings = generous_settings();
    settings.broker.max_connections = 1;
    let (addr, _store, _dir) = start_server(settings).await;

    let _first = connect(addr, 1).await;
    match connect_async(format!("ws://{addr}/?user_id=2")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("expected an HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn integration_handshake_rate_limited() {
    let mut settings = Settings::default();
    settings.rate_limit.per_second = 1;
    settings.rate_limit.burst = 1;
    let (addr, _store, _dir) = start_server(settings).await;

    let _first = connect(addr, 1).await;
    match connect_async(format!("ws://{addr}/?user_id=1")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 429),
        other => panic!("expected an HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn integration_stalled_handshake_releases_its_slot() {
    let mut settings = generous_settings();
    settings.broker.max_connections = 1;
    settings.server.handshake_timeout_ms = 100;
    let (addr, _store, _dir) = start_server(settings).await;

    // Open TCP but never send the upgrade request.
    let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let _client = connect(addr, 1).await;
}
