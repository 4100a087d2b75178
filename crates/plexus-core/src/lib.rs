//! Shared primitives: identifiers, connection identity, message-id
//! allocation, and the admission-control limiter.

pub mod connection;
pub mod ids;
pub mod limiter;
pub mod message_id;

pub use connection::ConnectionInfo;
pub use ids::{ClientUuid, ConnectionId, ContainerUuid};
pub use limiter::{RateLimit, RateLimiter};
pub use message_id::{MessageId, MessageIdAllocator, MessageIdParts};
