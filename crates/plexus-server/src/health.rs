//! `/health` endpoint.

use serde::Serialize;
use tokio::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Live session containers.
    pub containers: usize,
    /// Heavy operations currently holding a limiter slot.
    pub in_flight: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    connections: usize,
    containers: usize,
    in_flight: usize,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        containers,
        in_flight,
    }
}
