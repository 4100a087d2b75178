//! End-to-end tests over a real socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use plexus_codec::{decode, encode, Request, Response, Value, WireMode};
use plexus_core::ConnectionInfo;
use plexus_server::{builtin, PlexusServer, ServerConfig, ServerHandle, StaticIdentityResolver};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> ServerHandle {
    let mut ops = builtin::operations();
    ops.register_fn("test", |_params, _ctx| Ok(Value::from("test-ok")));
    ops.register_fn("whoami", |_params, ctx| {
        Ok(Value::from(ctx.client_id().map_or("", |c| c.as_str())))
    });

    let resolver = StaticIdentityResolver::new(HashMap::new())
        .with_token("good", ConnectionInfo::new("ws-1", "personal-1", "social-1"));
    PlexusServer::new(ServerConfig::default(), ops, Arc::new(resolver))
        .start()
        .await
        .unwrap()
}

async fn connect(handle: &ServerHandle, path: &str) -> Client {
    let url = format!("ws://127.0.0.1:{}{path}", handle.port());
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next data frame, skipping control frames.
async fn next_frame(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if matches!(msg, Message::Text(_) | Message::Binary(_) | Message::Close(_)) {
            return msg;
        }
    }
}

async fn next_json(ws: &mut Client) -> serde_json::Value {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

/// Poll `check` until it holds or a second passes.
async fn wait_for(check: impl Fn() -> bool) {
    for _ in 0..50 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_binary_response(ws: &mut Client) -> Response {
    match next_frame(ws).await {
        Message::Binary(data) => decode(data, WireMode::Binary).unwrap().unwrap(),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn hello_then_text_request() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good").await;

    let hello = next_json(&mut ws).await;
    assert_eq!(hello["result"]["hello"], true);
    assert_eq!(hello["result"]["binary"], false);
    assert_eq!(hello["result"]["workspace"], "ws-1");

    ws.send(Message::Text(r#"{"id":"1","method":"test","params":[]}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"id": "1", "result": "test-ok"}));

    handle.shutdown().await;
}

#[tokio::test]
async fn binary_mode_round_trip() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good?binary=true").await;

    let hello = next_json(&mut ws).await;
    assert_eq!(hello["result"]["binary"], true);

    let bytes = encode(&Request::new("1", "test", vec![]), WireMode::Binary).unwrap();
    ws.send(Message::Binary(bytes.into())).await.unwrap();
    let resp = next_binary_response(&mut ws).await;
    assert_eq!(resp, Response::success(Some("1".into()), Value::from("test-ok")));

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_operation_returns_error() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good").await;
    let _hello = next_json(&mut ws).await;

    ws.send(Message::Text(r#"{"id":"2","method":"missing"}"#.into()))
        .await
        .unwrap();
    let resp = next_json(&mut ws).await;
    assert_eq!(resp["id"], "2");
    assert_eq!(resp["error"], "unknown operation: missing");

    handle.shutdown().await;
}

#[tokio::test]
async fn ping_gets_pong() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good?binary=true").await;
    let _hello = next_json(&mut ws).await;

    ws.send(Message::Text("ping".into())).await.unwrap();
    match next_frame(&mut ws).await {
        Message::Text(text) => assert_eq!(text.as_str(), "pong"),
        other => panic!("expected pong, got {other:?}"),
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/bad-token").await;

    assert_eq!(next_json(&mut ws).await, json!({"error": "unauthorized"}));
    assert!(matches!(next_frame(&mut ws).await, Message::Close(_)));
    assert_eq!(handle.connections().count(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn session_id_becomes_client_id() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good?sessionId=abc-123").await;

    let hello = next_json(&mut ws).await;
    assert_eq!(hello["result"]["clientId"], "abc-123");

    ws.send(Message::Text(r#"{"id":"3","method":"whoami"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["result"], "abc-123");

    handle.shutdown().await;
}

#[tokio::test]
async fn broadcast_reaches_every_client_in_workspace() {
    let handle = start_server().await;
    let mut first = connect(&handle, "/ws/good").await;
    let mut second = connect(&handle, "/ws/good").await;
    let _ = next_json(&mut first).await;
    let _ = next_json(&mut second).await;
    assert_eq!(handle.manager().len(), 1);

    first
        .send(Message::Text(
            r#"{"id":"9","method":"broadcast","params":[{"kind":"tick"}]}"#.into(),
        ))
        .await
        .unwrap();

    // The push and the reply race on the sender's queue.
    let a = next_json(&mut first).await;
    let b = next_json(&mut first).await;
    let (reply, push) = if a.get("id").is_some() { (a, b) } else { (b, a) };
    assert_eq!(reply, json!({"id": "9", "result": 2}));
    assert_eq!(push, json!({"result": [{"kind": "tick"}]}));

    assert_eq!(next_json(&mut second).await, json!({"result": [{"kind": "tick"}]}));

    handle.shutdown().await;
}

#[tokio::test]
async fn closing_socket_unregisters_connection() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good").await;
    let _ = next_json(&mut ws).await;
    assert_eq!(handle.connections().count(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    wait_for(|| handle.connections().count() == 0).await;
    assert_eq!(handle.connections().count(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn pushes_follow_the_surviving_connection_of_a_shared_session() {
    let handle = start_server().await;
    let mut older = connect(&handle, "/ws/good?sessionId=shared").await;
    let _ = next_json(&mut older).await;
    let mut newer = connect(&handle, "/ws/good?sessionId=shared").await;
    let _ = next_json(&mut newer).await;
    assert_eq!(handle.connections().count(), 2);

    newer.close(None).await.unwrap();
    drop(newer);
    wait_for(|| handle.connections().count() == 1).await;

    // The push is queued before the reply on the same connection, so it is
    // seen first once the handler has moved over.
    let mut pushed = None;
    for attempt in 0..20 {
        let id = attempt.to_string();
        let request = json!({"id": id, "method": "broadcast", "params": ["evt"]});
        older.send(Message::Text(request.to_string().into())).await.unwrap();
        loop {
            let frame = next_json(&mut older).await;
            if frame["id"] == id.as_str() {
                assert_eq!(frame["result"], 1);
                break;
            }
            pushed = Some(frame);
        }
        if pushed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(pushed, Some(json!({"result": ["evt"]})));

    handle.shutdown().await;
}

#[tokio::test]
async fn heavy_operations_queue_behind_the_rate_limit() {
    let handle = start_server().await;
    handle.set_rate(1);
    let mut ws = connect(&handle, "/ws/good").await;
    let _ = next_json(&mut ws).await;

    let start = tokio::time::Instant::now();
    for id in ["1", "2"] {
        let request = json!({"id": id, "method": "sleep", "params": [300]});
        ws.send(Message::Text(request.to_string().into())).await.unwrap();
    }
    let limiter = handle.manager().limiter().clone();
    wait_for(|| limiter.in_flight() == 1).await;
    assert_eq!(limiter.in_flight(), 1);

    let first = next_json(&mut ws).await;
    let second = next_json(&mut ws).await;
    assert_eq!(first["result"], 300);
    assert_eq!(second["result"], 300);
    assert!(start.elapsed() >= Duration::from_millis(600));
    assert_eq!(limiter.in_flight(), 0);
    assert_eq!(limiter.admitted_total(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_heavy_work() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good").await;
    let _ = next_json(&mut ws).await;

    ws.send(Message::Text(r#"{"id":"1","method":"sleep","params":[300]}"#.into()))
        .await
        .unwrap();
    let limiter = handle.manager().limiter().clone();
    wait_for(|| limiter.in_flight() == 1).await;
    assert_eq!(limiter.in_flight(), 1);

    assert!(handle.shutdown().await);
    assert_eq!(limiter.in_flight(), 0);
}

#[tokio::test]
async fn shutdown_closes_live_sessions() {
    let handle = start_server().await;
    let mut ws = connect(&handle, "/ws/good").await;
    let _ = next_json(&mut ws).await;

    assert!(handle.shutdown().await);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
