//! Named operations and the registry containers dispatch through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use plexus_codec::Value;
use plexus_core::{ClientUuid, ConnectionInfo, ContainerUuid, MessageIdAllocator};

use crate::error::OperationError;
use crate::events::EventEmitter;

/// The client a request came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub client_id: ClientUuid,
    pub info: ConnectionInfo,
}

impl Caller {
    pub fn new(client_id: ClientUuid, info: ConnectionInfo) -> Self {
        Self { client_id, info }
    }
}

/// Everything a handler can see while it runs.
pub struct OperationContext {
    pub container_id: ContainerUuid,
    pub workspace: String,
    /// `None` for server-internal calls.
    pub caller: Option<Caller>,
    pub events: EventEmitter,
    pub ids: Arc<MessageIdAllocator>,
}

impl OperationContext {
    pub fn client_id(&self) -> Option<&ClientUuid> {
        self.caller.as_ref().map(|c| &c.client_id)
    }

    /// Push an event back to the calling client, if there is one.
    pub fn notify_caller(&self, event: Value) -> bool {
        match self.client_id() {
            Some(id) => self.events.send_to(id, event),
            None => false,
        }
    }
}

/// Trait implemented by every operation handler.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn run(&self, params: Vec<Value>, ctx: &OperationContext) -> Result<Value, OperationError>;
}

/// Adapter for synchronous closures.
struct FnOperation<F>(F);

#[async_trait]
impl<F> Operation for FnOperation<F>
where
    F: Fn(Vec<Value>, &OperationContext) -> Result<Value, OperationError> + Send + Sync,
{
    async fn run(&self, params: Vec<Value>, ctx: &OperationContext) -> Result<Value, OperationError> {
        (self.0)(params, ctx)
    }
}

#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) operation: Arc<dyn Operation>,
    /// Heavy operations are admitted through the rate limiter.
    pub(crate) heavy: bool,
}

/// Maps operation names to handlers.
#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Registered>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a light operation; it runs directly on the calling task.
    pub fn register(&mut self, name: &str, operation: impl Operation + 'static) {
        self.insert(name, Arc::new(operation), false);
    }

    /// Register an operation that must go through the rate limiter.
    pub fn register_heavy(&mut self, name: &str, operation: impl Operation + 'static) {
        self.insert(name, Arc::new(operation), true);
    }

    /// Register a synchronous closure as a light operation.
    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(Vec<Value>, &OperationContext) -> Result<Value, OperationError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name, Arc::new(FnOperation(f)), false);
    }

    fn insert(&mut self, name: &str, operation: Arc<dyn Operation>, heavy: bool) {
        if self
            .operations
            .insert(name.to_owned(), Registered { operation, heavy })
            .is_some()
        {
            tracing::warn!(operation = name, "operation re-registered, replacing handler");
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Registered> {
        self.operations.get(name)
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn is_heavy(&self, name: &str) -> bool {
        self.operations.get(name).is_some_and(|r| r.heavy)
    }

    /// Registered names, sorted.
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
