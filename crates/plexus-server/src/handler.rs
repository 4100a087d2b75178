//! Frame dispatch: decode a request, run it on the container, build the reply.

use plexus_codec::{decode, Frame, Request, Response};
use plexus_container::{Caller, Container};
use tracing::{debug, instrument, warn};

use crate::connection::ClientConnection;

/// Handle one inbound frame.
///
/// Returns the response to send, or `None` when nothing goes back: the frame
/// could not be assembled, or the request carried no id.
#[instrument(skip_all, fields(client_id = %conn.client_id, method))]
pub async fn handle_frame(
    frame: Frame,
    conn: &ClientConnection,
    container: &dyn Container,
) -> Option<Response> {
    let request: Request = match decode(frame, conn.mode) {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!("dropping frame that could not be assembled");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "undecodable request");
            return Some(Response::failure(None, format!("invalid request: {e}")));
        }
    };

    let _ = tracing::Span::current().record("method", request.method.as_str());
    debug!(id = ?request.id, "dispatching request");

    let caller = Caller::new(conn.client_id.clone(), conn.info.clone());
    let outcome = container
        .request(&request.method, request.params, Some(&caller))
        .await;

    match (request.id, outcome) {
        (Some(id), Ok(result)) => Some(Response::success(Some(id), result)),
        (Some(id), Err(e)) => {
            debug!(error = %e, "request failed");
            Some(Response::failure(Some(id), e.to_string()))
        }
        (None, Ok(_)) => None,
        (None, Err(e)) => {
            warn!(error = %e, "fire-and-forget request failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use plexus_codec::{encode, Value, WireMode};
    use plexus_container::{OperationError, OperationRegistry, SessionContainer};
    use plexus_core::{ClientUuid, ConnectionInfo, MessageIdAllocator, RateLimiter};
    use tokio::sync::mpsc;

    fn container() -> SessionContainer {
        let mut ops = OperationRegistry::new();
        ops.register_fn("test", |_params, _ctx| Ok(Value::from("test-ok")));
        ops.register_fn("fail", |_params, _ctx| Err(OperationError::Failed("broken".into())));
        ops.register_fn("who", |_params, ctx| {
            Ok(Value::from(ctx.caller.as_ref().map_or("", |c| c.info.social_id.as_str())))
        });
        SessionContainer::new(
            "ws",
            Arc::new(ops),
            RateLimiter::new(2),
            Arc::new(MessageIdAllocator::new()),
        )
    }

    fn connection(mode: WireMode) -> ClientConnection {
        let (tx, _rx) = mpsc::channel(8);
        ClientConnection::new(
            ClientUuid::from_raw("c1"),
            ConnectionInfo::new("ws", "pw", "social-42"),
            mode,
            tx,
        )
    }

    #[tokio::test]
    async fn binary_test_request_yields_test_ok() {
        let conn = connection(WireMode::Binary);
        let bytes = encode(&Request::new("1", "test", vec![]), WireMode::Binary).unwrap();

        let resp = handle_frame(Frame::from(bytes), &conn, &container()).await.unwrap();
        assert_eq!(resp, Response::success(Some("1".into()), Value::from("test-ok")));

        let wire = encode(&resp, WireMode::Binary).unwrap();
        let back: Response = decode(wire, WireMode::Binary).unwrap().unwrap();
        assert_eq!(back, resp);
    }

    #[tokio::test]
    async fn unknown_method_becomes_error_response() {
        let conn = connection(WireMode::Text);
        let frame = Frame::from(br#"{"id":"9","method":"nope","params":[]}"#.to_vec());
        let resp = handle_frame(frame, &conn, &container()).await.unwrap();
        assert_eq!(resp.id.as_deref(), Some("9"));
        assert_eq!(resp.error.as_deref(), Some("unknown operation: nope"));
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn operation_failure_becomes_error_response() {
        let conn = connection(WireMode::Text);
        let frame = Frame::from(br#"{"id":"3","method":"fail"}"#.to_vec());
        let resp = handle_frame(frame, &conn, &container()).await.unwrap();
        assert_eq!(resp.error.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn caller_identity_reaches_operation() {
        let conn = connection(WireMode::Text);
        let frame = Frame::from(br#"{"id":"4","method":"who"}"#.to_vec());
        let resp = handle_frame(frame, &conn, &container()).await.unwrap();
        assert_eq!(resp.result, Some(Value::from("social-42")));
    }

    #[tokio::test]
    async fn request_without_id_gets_no_response() {
        let conn = connection(WireMode::Text);
        let ok = Frame::from(br#"{"method":"test"}"#.to_vec());
        assert!(handle_frame(ok, &conn, &container()).await.is_none());
        let failing = Frame::from(br#"{"method":"nope"}"#.to_vec());
        assert!(handle_frame(failing, &conn, &container()).await.is_none());
    }

    #[tokio::test]
    async fn garbage_gets_error_without_id() {
        let conn = connection(WireMode::Text);
        let frame = Frame::from(b"{{{".to_vec());
        let resp = handle_frame(frame, &conn, &container()).await.unwrap();
        assert!(resp.id.is_none());
        assert!(resp.error.unwrap().starts_with("invalid request"));
    }

    #[tokio::test]
    async fn empty_fragment_list_is_dropped() {
        let conn = connection(WireMode::Binary);
        let frame = Frame::Fragmented(Vec::<Bytes>::new());
        assert!(handle_frame(frame, &conn, &container()).await.is_none());
    }
}
