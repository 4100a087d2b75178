//! Operations every plexus server exposes out of the box.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use plexus_codec::Value;
use plexus_container::{Operation, OperationContext, OperationError, OperationRegistry};

/// Longest pause `sleep` accepts.
pub const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Registry holding `echo`, `generate-id`, `broadcast` and the heavy
/// `sleep`.
pub fn operations() -> OperationRegistry {
    let mut ops = OperationRegistry::new();
    ops.register_fn("echo", echo);
    ops.register_fn("generate-id", generate_id);
    ops.register_fn("broadcast", broadcast);
    ops.register_heavy("sleep", Sleep);
    ops
}

fn echo(params: Vec<Value>, _ctx: &OperationContext) -> Result<Value, OperationError> {
    Ok(Value::Array(params))
}

/// Fresh MessageID with its decomposed parts.
fn generate_id(_params: Vec<Value>, ctx: &OperationContext) -> Result<Value, OperationError> {
    let id = ctx.ids.next();
    let parts = id.parse();
    let issued_at = i64::try_from(parts.timestamp_secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or(Value::Nil, |t| Value::from(t.to_rfc3339()));

    Ok(Value::Map(vec![
        (Value::from("id"), Value::from(id.as_u64())),
        (Value::from("timestamp"), Value::from(parts.timestamp_secs)),
        (Value::from("counter"), Value::from(parts.counter)),
        (Value::from("issuedAt"), issued_at),
    ]))
}

/// Push the params to every client of the container. Returns the number
/// of clients reached.
fn broadcast(params: Vec<Value>, ctx: &OperationContext) -> Result<Value, OperationError> {
    if params.is_empty() {
        return Err(OperationError::InvalidParams("broadcast needs at least one param".into()));
    }
    let reached = ctx.events.broadcast(&Value::Array(params));
    Ok(Value::from(reached as u64))
}

/// Hold a rate-limiter slot for `params[0]` milliseconds. Returns the
/// milliseconds actually slept.
struct Sleep;

#[async_trait]
impl Operation for Sleep {
    async fn run(&self, params: Vec<Value>, _ctx: &OperationContext) -> Result<Value, OperationError> {
        let millis = params
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| OperationError::InvalidParams("sleep needs a millisecond count".into()))?;
        let pause = Duration::from_millis(millis).min(MAX_SLEEP);
        tokio::time::sleep(pause).await;
        Ok(Value::from(pause.as_millis() as u64))
    }
}
