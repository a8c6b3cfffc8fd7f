use super::Connection;
use crate::utils::error::DeliveryError;
use tungstenite::protocol::Message as WsMessage;

#[test]
fn test_connection_new() {
    let (conn, _rx) = Connection::channel(7, 4);
    let (other, _other_rx) = Connection::channel(7, 4);
    assert_eq!(conn.principal, 7);
    assert_ne!(conn.id, other.id);
    assert!(!conn.is_closed());
}

#[test]
fn test_deliver_enqueues_frame() {
    let (conn, mut rx) = Connection::channel(1, 4);
    conn.deliver(WsMessage::text("hello")).unwrap();

    match rx.try_recv().unwrap() {
        WsMessage::Text(text) => assert_eq!(text.as_str(), "hello"),
        other => panic!("Expected a text message, got {other:?}"),
    }
}

#[test]
fn test_deliver_to_full_queue_is_backlogged() {
    let (conn, _rx) = Connection::channel(1, 1);
    conn.deliver(WsMessage::text("first")).unwrap();
    assert_eq!(
        conn.deliver(WsMessage::text("second")),
        Err(DeliveryError::Backlogged)
    );
}

#[test]
fn test_deliver_after_writer_dropped_is_closed() {
    let (conn, rx) = Connection::channel(1, 4);
    drop(rx);
    assert!(conn.is_closed());
    assert_eq!(
        conn.deliver(WsMessage::text("hello")),
        Err(DeliveryError::Closed)
    );
}

#[tokio::test]
async fn test_close_is_visible_to_clones() {
    let (conn, _rx) = Connection::channel(1, 4);
    let clone = conn.clone();

    clone.close();
    conn.closed().await;

    assert!(conn.is_closed());
    assert_eq!(
        conn.deliver(WsMessage::text("late")),
        Err(DeliveryError::Closed)
    );
}
