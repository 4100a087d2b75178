//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use plexus_codec::{Frame, Response, Value, WireMode};
use plexus_container::{Container, ContainerError, ContainerManager, EventHandler, SessionContainer};
use plexus_core::{ClientUuid, ConnectionInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connection::{encode_frame, ClientConnection, Outbound};
use crate::handler::handle_frame;
use crate::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::server::AppState;

/// Liveness check answered without touching the codec.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// How long the writer gets to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run a WebSocket session for an authenticated client.
///
/// 1. Attaches the client to its workspace container
/// 2. Sends the hello response
/// 3. Dispatches each inbound frame as an independent task
/// 4. Forwards responses and pushes via the send channel, with periodic pings
/// 5. Closes silent connections and detaches on disconnect
#[instrument(skip_all, fields(client_id, workspace = %info.workspace))]
pub async fn run_ws_session(
    socket: WebSocket,
    info: ConnectionInfo,
    mode: WireMode,
    session_id: Option<String>,
    state: AppState,
) {
    let client_id = session_id.map(ClientUuid::from_raw).unwrap_or_default();
    let _ = tracing::Span::current().record("client_id", client_id.as_str());

    let (send_tx, send_rx) = mpsc::channel::<Outbound>(state.config.max_send_queue.max(1));
    let conn = Arc::new(ClientConnection::new(client_id, info, mode, send_tx));

    let Some(container) = attach(&state.manager, &conn).await else {
        warn!("could not attach to a container");
        return;
    };
    state.connections.add(Arc::clone(&conn));
    info!(connection_id = %conn.id, binary = mode.is_binary(), "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Some(Outbound::Text(hello)) = encode_frame(&hello_response(&conn), WireMode::Text) {
        let _ = ws_tx.send(Message::Text(hello.into())).await;
    }

    let session_cancel = state.shutdown.token().child_token();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        state.config.heartbeat_interval(),
        session_cancel.clone(),
    ));

    let heartbeat = {
        let conn = Arc::clone(&conn);
        let cancel = session_cancel.clone();
        let interval = state.config.heartbeat_interval();
        let timeout = state.config.heartbeat_timeout();
        tokio::spawn(async move {
            if run_heartbeat(conn, interval, timeout, cancel.clone()).await == HeartbeatResult::TimedOut {
                warn!("client unresponsive for {timeout:?}, disconnecting");
                cancel.cancel();
            }
        })
    };

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = session_cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        conn.mark_alive();

        let frame = match msg {
            Message::Text(text) => {
                if text.as_str() == PING {
                    let _ = conn.send(Outbound::Text(PONG.into()));
                    continue;
                }
                Frame::from(Bytes::copy_from_slice(text.as_str().as_bytes()))
            }
            Message::Binary(data) => {
                if data.as_ref() == PING.as_bytes() {
                    let _ = conn.send(Outbound::Text(PONG.into()));
                    continue;
                }
                Frame::Contiguous(data)
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        };

        let conn = Arc::clone(&conn);
        let container = Arc::clone(&container);
        drop(tokio::spawn(async move {
            if let Some(response) = handle_frame(frame, &conn, container.as_ref()).await {
                if !conn.send_response(&response) {
                    debug!("failed to enqueue response (channel full or closed)");
                }
            }
        }));
    }

    session_cancel.cancel();
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    heartbeat.abort();

    let _ = state.connections.remove(&conn.id);
    detach(&state, &conn, container.as_ref()).await;
    info!(
        connection_id = %conn.id,
        dropped = conn.drop_count(),
        age_secs = conn.age().as_secs(),
        "client disconnected"
    );
}

/// Answer an unresolvable token, then close.
pub async fn reject_unauthorized(mut socket: WebSocket) {
    if let Some(Outbound::Text(text)) =
        encode_frame(&Response::failure(None, "unauthorized"), WireMode::Text)
    {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "unauthorized".into(),
        })))
        .await;
}

/// Register the connection with its workspace container.
///
/// A container can be reaped between lookup and connect; one retry gets a
/// fresh one.
async fn attach(
    manager: &ContainerManager,
    conn: &Arc<ClientConnection>,
) -> Option<Arc<SessionContainer>> {
    for _ in 0..2 {
        let container = manager.get_or_create(&conn.info.workspace);
        match container.connect(conn.client_id.clone(), push_handler(conn)).await {
            Ok(()) => return Some(container),
            Err(ContainerError::Terminated) => continue,
            Err(e) => {
                warn!(error = %e, "connect failed");
                return None;
            }
        }
    }
    None
}

/// Hand the client id to a surviving connection that shares it, or
/// disconnect it from the container when none is left.
async fn detach(state: &AppState, conn: &ClientConnection, container: &SessionContainer) {
    let survivor = state
        .connections
        .for_client(&conn.client_id)
        .into_iter()
        .find(|other| other.info.workspace == conn.info.workspace);

    let outcome = match survivor {
        Some(survivor) => {
            debug!(connection_id = %survivor.id, "pushes move to surviving connection");
            container
                .connect(conn.client_id.clone(), push_handler(&survivor))
                .await
        }
        None => container.disconnect(&conn.client_id).await,
    };
    match outcome {
        Ok(()) | Err(ContainerError::Terminated) => {}
        Err(e) => warn!(error = %e, "detach failed"),
    }
}

/// Event handler that pushes into `conn`'s send queue.
fn push_handler(conn: &Arc<ClientConnection>) -> EventHandler {
    let conn = Arc::clone(conn);
    Arc::new(move |event: Value| {
        if !conn.send_response(&Response::push(event)) {
            debug!(client_id = %conn.client_id, "dropped push event");
        }
    })
}

fn hello_response(conn: &ClientConnection) -> Response {
    Response::success(
        None,
        Value::Map(vec![
            (Value::from("hello"), Value::Boolean(true)),
            (Value::from("clientId"), Value::from(conn.client_id.as_str())),
            (Value::from("binary"), Value::Boolean(conn.mode.is_binary())),
            (Value::from("workspace"), Value::from(conn.info.workspace.as_str())),
        ]),
    )
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    ping_every: Duration,
    cancel: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let sent = match msg {
                    Some(Outbound::Text(text)) => ws_tx.send(Message::Text(text.into())).await,
                    Some(Outbound::Binary(data)) => ws_tx.send(Message::Binary(data.into())).await,
                    None => break,
                };
                if sent.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
