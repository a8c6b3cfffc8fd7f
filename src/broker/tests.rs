use super::event::Event;
use super::hub::Hub;
use super::registry::Registry;
use super::topic::Topic;
use crate::client::Connection;
use tokio::sync::mpsc::Receiver;
use tokio::time::{Duration, timeout};
use tungstenite::protocol::Message as WsMessage;

fn connection(principal: i64) -> (Connection, Receiver<WsMessage>) {
    Connection::channel(principal, 8)
}

fn text(rx: &mut Receiver<WsMessage>) -> String {
    match rx.try_recv().expect("expected a frame") {
        WsMessage::Text(text) => text.as_str().to_string(),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

async fn recv(rx: &mut Receiver<WsMessage>) -> String {
    match timeout(Duration::from_secs(1), rx.recv()).await {
        Ok(Some(WsMessage::Text(t))) => t.as_str().to_string(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

fn assert_no_empty_topics(registry: &Registry) {
    for (id, topic) in &registry.topics {
        assert!(!topic.is_empty(), "topic {id} kept with no subscribers");
    }
}

#[test]
fn test_topic_new() {
    let topic = Topic::new(5);
    assert_eq!(topic.id, 5);
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_topic_subscribe_is_idempotent() {
    let mut topic = Topic::new(5);
    let (conn, _rx) = connection(1);
    assert!(topic.subscribe(conn.clone()));
    assert!(!topic.subscribe(conn.clone()));
    assert_eq!(topic.subscribers.len(), 1);
    assert!(topic.unsubscribe(&conn.id));
    assert!(!topic.unsubscribe(&conn.id));
}

#[test]
fn test_registry_new() {
    let registry = Registry::default();
    assert!(registry.topics.is_empty());
    assert_eq!(registry.topic_count(), 0);
}

#[test]
fn test_subscribe_and_unsubscribe() {
    let mut registry = Registry::new();
    let (conn, _rx) = connection(1);

    registry.subscribe(5, conn.clone());
    assert!(registry.contains(5, &conn.id));
    assert_eq!(registry.subscriber_count(5), 1);

    registry.unsubscribe(5, &conn.id);
    assert!(!registry.contains(5, &conn.id));
    assert!(!registry.topics.contains_key(&5));
}

#[test]
fn test_membership_folds_as_set_operations() {
    let mut registry = Registry::new();
    let (conn, _rx) = connection(1);

    // (is_subscribe, expected membership afterwards)
    let script = [
        (true, true),
        (true, true),
        (false, false),
        (false, false),
        (true, true),
        (false, false),
        (true, true),
    ];
    for (subscribe, expected) in script {
        if subscribe {
            registry.subscribe(9, conn.clone());
        } else {
            registry.unsubscribe(9, &conn.id);
        }
        assert_eq!(registry.contains(9, &conn.id), expected);
        assert_eq!(registry.subscriber_count(9), usize::from(expected));
        assert_no_empty_topics(&registry);
    }
}

#[test]
fn test_connection_may_join_many_topics() {
    let mut registry = Registry::new();
    let (conn, _rx) = connection(1);

    registry.subscribe(1, conn.clone());
    registry.subscribe(2, conn.clone());
    registry.unsubscribe(1, &conn.id);

    assert!(!registry.contains(1, &conn.id));
    assert!(registry.contains(2, &conn.id));
    assert_eq!(registry.topic_count(), 1);
}

#[test]
fn test_unsubscribe_never_subscribed_is_noop() {
    let mut registry = Registry::new();
    let (member, _rx) = connection(1);
    let (stranger, _rx2) = connection(2);
    registry.subscribe(5, member.clone());

    assert!(!registry.unsubscribe(5, &stranger.id));
    assert!(!registry.unsubscribe(6, &stranger.id));

    assert_eq!(registry.subscriber_count(5), 1);
    assert_eq!(registry.topic_count(), 1);
}

#[test]
fn test_broadcast_to_empty_topic_is_noop() {
    let mut registry = Registry::new();
    let report = registry.broadcast(42, &WsMessage::text("hello"));
    assert_eq!(report.delivered, 0);
    assert!(report.dropped.is_empty());
    assert!(registry.topics.is_empty());
}

#[test]
fn test_broadcast_reaches_only_topic_subscribers() {
    let mut registry = Registry::new();
    let mut on_topic = Vec::new();
    for principal in 0..3 {
        let (conn, rx) = connection(principal);
        registry.subscribe(5, conn);
        on_topic.push(rx);
    }
    let (other, mut other_rx) = connection(99);
    registry.subscribe(6, other);

    let report = registry.broadcast(5, &WsMessage::text("hello"));
    assert_eq!(report.delivered, 3);

    for rx in &mut on_topic {
        assert_eq!(text(rx), "hello");
        assert!(rx.try_recv().is_err(), "exactly one copy per subscriber");
    }
    assert!(other_rx.try_recv().is_err());
}

#[test]
fn test_failed_delivery_drops_only_that_subscriber() {
    let mut registry = Registry::new();
    let (healthy, mut healthy_rx) = connection(1);
    let (broken, broken_rx) = connection(2);
    registry.subscribe(5, healthy.clone());
    registry.subscribe(5, broken.clone());
    registry.subscribe(6, broken.clone());

    drop(broken_rx);

    let report = registry.broadcast(5, &WsMessage::text("hello"));
    assert_eq!(report.delivered, 1);
    assert_eq!(report.dropped, vec![broken.id]);

    assert_eq!(text(&mut healthy_rx), "hello");
    assert!(registry.contains(5, &healthy.id));
    assert!(!registry.contains(5, &broken.id));
    assert!(broken.is_closed());
    // Only the broadcast topic heals; other topics are cleaned on their own
    // broadcast or when the connection's pump exits.
    assert!(registry.contains(6, &broken.id));
}

#[test]
fn test_backlogged_subscriber_is_dropped() {
    let mut registry = Registry::new();
    let (slow, _slow_rx) = Connection::channel(1, 1);
    let (fast, mut fast_rx) = connection(2);
    registry.subscribe(5, slow.clone());
    registry.subscribe(5, fast.clone());

    registry.broadcast(5, &WsMessage::text("one"));
    let report = registry.broadcast(5, &WsMessage::text("two"));

    assert_eq!(report.dropped, vec![slow.id]);
    assert_eq!(text(&mut fast_rx), "one");
    assert_eq!(text(&mut fast_rx), "two");
}

#[test]
fn test_last_failed_subscriber_removes_topic() {
    let mut registry = Registry::new();
    let (conn, rx) = connection(1);
    registry.subscribe(5, conn);
    drop(rx);

    registry.broadcast(5, &WsMessage::text("hello"));
    assert_eq!(registry.topic_count(), 0);
    assert_no_empty_topics(&registry);
}

#[test]
fn test_apply_dispatches_events() {
    let mut registry = Registry::new();
    let (conn, mut rx) = connection(1);

    registry.apply(Event::Subscribe {
        topic: 3,
        connection: conn.clone(),
    });
    registry.apply(Event::Broadcast {
        topic: 3,
        payload: WsMessage::text("ping"),
    });
    registry.apply(Event::Unsubscribe {
        topic: 3,
        connection: conn.id,
    });

    assert_eq!(text(&mut rx), "ping");
    assert_eq!(registry.topic_count(), 0);
}

#[tokio::test]
async fn test_hub_serializes_events_in_arrival_order() {
    let (handle, hub) = Hub::spawn(16);
    let (early, mut early_rx) = connection(1);
    let (late, mut late_rx) = connection(2);

    handle.subscribe(5, early.clone()).await.unwrap();
    handle.broadcast(5, WsMessage::text("first")).await.unwrap();
    handle.subscribe(5, late.clone()).await.unwrap();
    handle.broadcast(5, WsMessage::text("second")).await.unwrap();

    assert_eq!(recv(&mut early_rx).await, "first");
    assert_eq!(recv(&mut early_rx).await, "second");
    // `late` subscribed after the first broadcast was queued.
    assert_eq!(recv(&mut late_rx).await, "second");
    assert!(late_rx.try_recv().is_err());

    drop(handle);
    hub.await.unwrap();
}

#[tokio::test]
async fn test_hub_survives_failed_deliveries() {
    let (handle, _hub) = Hub::spawn(16);
    let (gone, gone_rx) = connection(1);
    let (alive, mut alive_rx) = connection(2);
    drop(gone_rx);

    handle.subscribe_all([5, 6], &gone).await.unwrap();
    handle.subscribe(6, alive.clone()).await.unwrap();
    handle.broadcast(5, WsMessage::text("into the void")).await.unwrap();
    handle.broadcast(6, WsMessage::text("still here")).await.unwrap();

    assert_eq!(recv(&mut alive_rx).await, "still here");
    assert!(!handle.is_closed());
}

#[tokio::test]
async fn test_submit_to_stopped_hub_fails() {
    let (hub, handle) = Hub::new(1);
    drop(hub);
    let (conn, _rx) = connection(1);
    assert!(handle.subscribe(1, conn).await.is_err());
    assert!(handle.is_closed());
}
