//! # plexus-server
//!
//! Axum HTTP + `WebSocket` gateway in front of the session containers.
//!
//! - Token authentication resolved before the upgrade
//! - Per-connection wire mode (MessagePack or JSON), fixed at connect time
//! - Concurrent request dispatch with bounded, drop-counting send queues
//! - Heartbeat liveness, idle container reaping, graceful shutdown

#![deny(unsafe_code)]

pub mod auth;
pub mod builtin;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod server;
pub mod session;
pub mod shutdown;

pub use auth::{
    resolver_from_config, HttpIdentityResolver, IdentityResolver, JwtIdentityResolver,
    StaticIdentityResolver,
};
pub use config::{ConfigError, IdentityConfig, ServerConfig};
pub use error::ServerError;
pub use server::{build_router, AppState, PlexusServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
