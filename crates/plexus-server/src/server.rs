//! `PlexusServer`: Axum HTTP + WebSocket front end for the session containers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use plexus_codec::WireMode;
use plexus_container::{start_reaper, ContainerManager, OperationRegistry};
use plexus_core::{MessageIdAllocator, RateLimit, RateLimiter};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::IdentityResolver;
use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub manager: Arc<ContainerManager>,
    pub connections: Arc<ConnectionRegistry>,
    pub identity: Arc<dyn IdentityResolver>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// Query string accepted on the WebSocket route.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Wire mode for this connection; falls back to the configured default.
    pub binary: Option<bool>,
    /// Reuse a client id across reconnects.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// The plexus server, before it is bound.
pub struct PlexusServer {
    state: AppState,
    rate: Arc<AtomicUsize>,
}

impl PlexusServer {
    /// Wire up the limiter, id allocator and container manager around
    /// `operations`.
    pub fn new(
        config: ServerConfig,
        operations: OperationRegistry,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let rate = Arc::new(AtomicUsize::new(config.rate));
        let limiter = {
            let rate = Arc::clone(&rate);
            RateLimiter::with_capacity(move || RateLimit {
                rate: rate.load(Ordering::Relaxed),
            })
        };
        let manager = Arc::new(ContainerManager::new(
            Arc::new(operations),
            limiter,
            Arc::new(MessageIdAllocator::new()),
        ));

        Self {
            state: AppState {
                config: Arc::new(config),
                manager,
                connections: Arc::new(ConnectionRegistry::new()),
                identity,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
            rate,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn manager(&self) -> &Arc<ContainerManager> {
        &self.state.manager
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Bind, then serve in the background along with the idle-container
    /// reaper.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.state.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                message: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let token = self.state.shutdown.token();
        let idle = self.state.config.idle_container();
        let reaper = start_reaper(
            Arc::clone(&self.state.manager),
            (idle / 2).max(std::time::Duration::from_secs(1)),
            idle,
            token.clone(),
        );

        let router = self.router();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });

        info!(addr = %local_addr, rate = self.rate.load(Ordering::Relaxed), "plexus server started");

        Ok(ServerHandle {
            addr: local_addr,
            state: self.state,
            rate: self.rate,
            tasks: vec![server, reaper],
        })
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{token}", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Handle returned by [`PlexusServer::start`]. Keeps background tasks alive.
pub struct ServerHandle {
    addr: SocketAddr,
    state: AppState,
    rate: Arc<AtomicUsize>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn manager(&self) -> &Arc<ContainerManager> {
        &self.state.manager
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }

    /// Change the heavy-operation capacity. Waiters re-check immediately.
    pub fn set_rate(&self, rate: usize) {
        self.rate.store(rate, Ordering::Relaxed);
        self.state.manager.limiter().recheck();
        info!(rate, "rate limit updated");
    }

    pub fn rate(&self) -> usize {
        self.rate.load(Ordering::Relaxed)
    }

    /// Stop accepting, close sessions, terminate every container and wait
    /// for in-flight heavy operations.
    ///
    /// Returns `true` when everything finished within the configured
    /// timeout.
    pub async fn shutdown(self) -> bool {
        let shutdown = Arc::clone(&self.state.shutdown);
        shutdown.shutdown();

        let terminated = self.state.manager.terminate_all().await;
        info!(containers = terminated, "containers terminated");

        let limiter = self.state.manager.limiter().clone();
        let clean = shutdown
            .graceful_shutdown(
                self.tasks,
                async move { limiter.wait_idle().await },
                self.state.config.shutdown_timeout(),
            )
            .await;
        info!(clean, "plexus server stopped");
        clean
    }
}

/// GET /ws/{token}
///
/// The token is resolved before the upgrade; unknown tokens still upgrade so
/// the client receives a readable error before the close.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let mode = WireMode::from_binary_flag(query.binary.unwrap_or(state.config.default_binary));
    let identity = state.identity.resolve(&token).await;

    ws.on_upgrade(move |socket| async move {
        match identity {
            Some(info) => {
                session::run_ws_session(socket, info, mode, query.session_id, state).await;
            }
            None => {
                warn!("rejecting connection with unknown token");
                session::reject_unauthorized(socket).await;
            }
        }
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shutting_down = state.shutdown.is_shutting_down();
    let resp: HealthResponse = health::health_check(
        state.start_time,
        shutting_down,
        state.connections.count(),
        state.manager.len(),
        state.manager.limiter().in_flight(),
    );
    let status = if shutting_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(resp))
}
