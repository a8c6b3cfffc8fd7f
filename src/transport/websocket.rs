//! WebSocket transport
//!
//! Accepts TCP connections, performs the WebSocket handshake and wires each
//! connection to the hub:
//! - a peer that has not finished the upgrade within `handshake_timeout` is
//!   dropped, releasing its connection slot;
//! - the handshake is refused with 429 when the peer's origin is over its
//!   rate limit, 503 when `max_connections` are already open, and 400 when
//!   the request carries no valid `user_id` query parameter (the principal);
//! - a writer task owns the socket sink and drains the connection's bounded
//!   outbound queue, bounding every write with `write_timeout`;
//! - an [`InboundPump`] owns the socket stream.
//!
//! Either side closing the connection's shutdown token tears down both.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::Error as WsError;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::event::Principal;
use crate::broker::hub::HubHandle;
use crate::client::{Connection, ConnectionId};
use crate::config::Settings;
use crate::persistence::ChatStore;
use crate::ratelimit::OriginLimiter;
use crate::transport::pump::InboundPump;
use crate::utils::error::ServerError;

/// Everything a connection task needs, shared across all of them.
#[derive(Clone)]
pub struct ServerContext {
    pub hub: HubHandle,
    pub store: Arc<dyn ChatStore>,
    pub limiter: Arc<OriginLimiter>,
    pub outbound_buffer: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub max_connections: usize,
    active: Arc<AtomicUsize>,
}

impl ServerContext {
    pub fn new(hub: HubHandle, store: Arc<dyn ChatStore>, settings: &Settings) -> Self {
        Self {
            hub,
            store,
            limiter: Arc::new(OriginLimiter::new(
                settings.rate_limit.per_second,
                settings.rate_limit.burst,
            )),
            outbound_buffer: settings.broker.outbound_buffer,
            handshake_timeout: Duration::from_millis(settings.server.handshake_timeout_ms),
            write_timeout: Duration::from_millis(settings.server.write_timeout_ms),
            max_connections: settings.broker.max_connections,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Holds one of the `max_connections` slots until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub async fn start_websocket_server(addr: String, ctx: ServerContext) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    serve(listener, ctx).await;
    Ok(())
}

/// Accept connections from `listener` forever.
pub async fn serve(listener: TcpListener, ctx: ServerContext) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{addr}"),
        Err(e) => warn!(error = %e, "WebSocket server listening on unknown address"),
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(stream, peer, ctx.clone()));
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ServerContext) {
    let origin = peer.ip().to_string();
    let slot = ConnectionSlot::acquire(&ctx.active, ctx.max_connections);
    let mut principal = None;

    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if !ctx.limiter.admit(&origin) {
            return Err(reject(StatusCode::TOO_MANY_REQUESTS, "too many requests"));
        }
        if slot.is_none() {
            return Err(reject(StatusCode::SERVICE_UNAVAILABLE, "server is at capacity"));
        }
        match principal_from_query(req.uri().query()) {
            Some(p) => {
                principal = Some(p);
                Ok(response)
            }
            None => Err(reject(StatusCode::BAD_REQUEST, "missing or invalid user_id")),
        }
    };

    let ws_stream = match timeout(ctx.handshake_timeout, accept_hdr_async(stream, callback)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            info!(%origin, error = %e, "WebSocket handshake refused");
            return;
        }
        Err(_) => {
            info!(%origin, "WebSocket handshake timed out");
            return;
        }
    };
    let (Some(principal), Some(_slot)) = (principal, slot) else {
        return;
    };

    let (ws_sender, ws_receiver) = ws_stream.split();
    let (connection, rx) = Connection::channel(principal, ctx.outbound_buffer);

    tokio::spawn(write_loop(
        ws_sender,
        rx,
        connection.shutdown_token(),
        connection.id,
        ctx.write_timeout,
    ));

    InboundPump::new(connection, origin, ctx.hub.clone(), ctx.store.clone(), ctx.limiter.clone())
        .run(ws_receiver)
        .await;
}

/// Forward queued frames to the socket until the connection shuts down or a
/// write fails or exceeds `write_timeout`.
async fn write_loop<S>(
    mut sink: S,
    mut rx: Receiver<WsMessage>,
    shutdown: CancellationToken,
    connection: ConnectionId,
    write_timeout: Duration,
) where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                info!(%connection, error = %e, "failed to send message");
                break;
            }
            Err(_) => {
                warn!(%connection, timeout_ms = write_timeout.as_millis() as u64, "write timed out");
                break;
            }
        }
    }

    shutdown.cancel();
    rx.close();
    let _ = timeout(write_timeout, sink.close()).await;
    debug!(%connection, "send loop closed");
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Read the `user_id` query parameter.
fn principal_from_query(query: Option<&str>) -> Option<Principal> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user_id")
        .and_then(|(_, value)| value.parse().ok())
}
