//! Session containers: per-workspace dispatch of named operations and
//! fan-out of events to connected clients.

pub mod container;
pub mod error;
pub mod events;
pub mod manager;
pub mod operation;

pub use container::{Container, SessionContainer, TerminatedHook};
pub use error::{ContainerError, OperationError};
pub use events::{EventEmitter, EventHandler};
pub use manager::{start_reaper, ContainerManager};
pub use operation::{Caller, Operation, OperationContext, OperationRegistry};
