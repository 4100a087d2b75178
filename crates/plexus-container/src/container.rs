//! The container capability set and the in-process session container.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plexus_codec::Value;
use plexus_core::{ClientUuid, ContainerUuid, MessageIdAllocator, RateLimiter};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ContainerError;
use crate::events::{EventEmitter, EventHandler};
use crate::operation::{Caller, OperationContext, OperationRegistry};

/// Callback run once when a container terminates.
pub type TerminatedHook = Box<dyn FnOnce() + Send>;

/// Capabilities every container exposes to the transport.
///
/// After [`terminate`](Container::terminate) every other call fails fast with
/// [`ContainerError::Terminated`].
#[async_trait]
pub trait Container: Send + Sync {
    /// Run the named operation.
    async fn request(
        &self,
        operation: &str,
        params: Vec<Value>,
        caller: Option<&Caller>,
    ) -> Result<Value, ContainerError>;

    /// Register the event handler for `client_id`, replacing any previous one.
    async fn connect(&self, client_id: ClientUuid, handler: EventHandler) -> Result<(), ContainerError>;

    /// Forget `client_id`; later events for it are dropped.
    async fn disconnect(&self, client_id: &ClientUuid) -> Result<(), ContainerError>;

    /// Move to the terminal state. Idempotent.
    async fn terminate(&self);

    /// Liveness check.
    async fn ping(&self) -> Result<(), ContainerError>;

    /// Run `hook` exactly once on termination, or now if already terminated.
    fn on_terminated(&self, hook: TerminatedHook);
}

/// Container holding the sessions of one workspace.
pub struct SessionContainer {
    id: ContainerUuid,
    workspace: String,
    operations: Arc<OperationRegistry>,
    limiter: RateLimiter,
    ids: Arc<MessageIdAllocator>,
    events: EventEmitter,
    terminated: AtomicBool,
    /// Guards the transition to terminated together with the hook slot.
    on_terminated: Mutex<Option<TerminatedHook>>,
    last_visit: Mutex<Instant>,
}

impl SessionContainer {
    pub fn new(
        workspace: impl Into<String>,
        operations: Arc<OperationRegistry>,
        limiter: RateLimiter,
        ids: Arc<MessageIdAllocator>,
    ) -> Self {
        Self {
            id: ContainerUuid::new(),
            workspace: workspace.into(),
            operations,
            limiter,
            ids,
            events: EventEmitter::default(),
            terminated: AtomicBool::new(false),
            on_terminated: Mutex::new(None),
            last_visit: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &ContainerUuid {
        &self.id
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn client_count(&self) -> usize {
        self.events.client_count()
    }

    /// Time since the last request, connect or ping.
    pub fn idle_for(&self) -> Duration {
        self.last_visit.lock().elapsed()
    }

    pub fn last_visit(&self) -> Instant {
        *self.last_visit.lock()
    }

    /// Push an event to one client. Dropped when the client is gone.
    pub fn send_event(&self, client_id: &ClientUuid, event: Value) -> bool {
        !self.is_terminated() && self.events.send_to(client_id, event)
    }

    /// Push an event to every connected client.
    pub fn broadcast(&self, event: &Value) -> usize {
        if self.is_terminated() {
            return 0;
        }
        self.events.broadcast(event)
    }

    fn ensure_active(&self) -> Result<(), ContainerError> {
        if self.is_terminated() {
            Err(ContainerError::Terminated)
        } else {
            Ok(())
        }
    }

    fn touch(&self) {
        *self.last_visit.lock() = Instant::now();
    }
}

#[async_trait]
impl Container for SessionContainer {
    async fn request(
        &self,
        operation: &str,
        params: Vec<Value>,
        caller: Option<&Caller>,
    ) -> Result<Value, ContainerError> {
        self.ensure_active()?;
        self.touch();

        let Some(entry) = self.operations.get(operation) else {
            debug!(container_id = %self.id, operation, "unknown operation");
            return Err(ContainerError::UnknownOperation(operation.to_owned()));
        };

        let ctx = OperationContext {
            container_id: self.id.clone(),
            workspace: self.workspace.clone(),
            caller: caller.cloned(),
            events: self.events.clone(),
            ids: Arc::clone(&self.ids),
        };

        let result = if entry.heavy {
            self.limiter
                .execute(|| entry.operation.run(params, &ctx))
                .await
        } else {
            entry.operation.run(params, &ctx).await
        };
        Ok(result?)
    }

    async fn connect(&self, client_id: ClientUuid, handler: EventHandler) -> Result<(), ContainerError> {
        self.ensure_active()?;
        if !self.events.register(client_id.clone(), handler) {
            return Err(ContainerError::Terminated);
        }
        self.touch();
        debug!(container_id = %self.id, client_id = %client_id, "client connected");
        Ok(())
    }

    async fn disconnect(&self, client_id: &ClientUuid) -> Result<(), ContainerError> {
        self.ensure_active()?;
        if self.events.remove(client_id) {
            debug!(container_id = %self.id, client_id = %client_id, "client disconnected");
        }
        Ok(())
    }

    async fn terminate(&self) {
        let hook = {
            let mut slot = self.on_terminated.lock();
            if self.terminated.swap(true, Ordering::AcqRel) {
                return;
            }
            slot.take()
        };
        self.events.close();
        info!(container_id = %self.id, workspace = %self.workspace, "container terminated");
        if let Some(hook) = hook {
            hook();
        }
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.ensure_active()?;
        self.touch();
        Ok(())
    }

    fn on_terminated(&self, hook: TerminatedHook) {
        {
            let mut slot = self.on_terminated.lock();
            if !self.is_terminated() {
                *slot = Some(hook);
                return;
            }
        }
        hook();
    }
}
