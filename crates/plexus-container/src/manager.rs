//! One session container per workspace, created on first use.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use plexus_core::{MessageIdAllocator, RateLimiter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::container::{Container, SessionContainer};
use crate::operation::OperationRegistry;

type ContainerMap = DashMap<String, Arc<SessionContainer>>;

/// Owns the live containers and the state they share: the operation
/// registry, the rate limiter and the message-id allocator.
pub struct ContainerManager {
    containers: Arc<ContainerMap>,
    operations: Arc<OperationRegistry>,
    limiter: RateLimiter,
    ids: Arc<MessageIdAllocator>,
}

impl ContainerManager {
    pub fn new(
        operations: Arc<OperationRegistry>,
        limiter: RateLimiter,
        ids: Arc<MessageIdAllocator>,
    ) -> Self {
        Self {
            containers: Arc::new(DashMap::new()),
            operations,
            limiter,
            ids,
        }
    }

    /// Container for `workspace`, creating it if absent or terminated.
    pub fn get_or_create(&self, workspace: &str) -> Arc<SessionContainer> {
        match self.containers.entry(workspace.to_owned()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_terminated() {
                    let fresh = self.spawn_container(workspace);
                    let _ = entry.insert(Arc::clone(&fresh));
                    fresh
                } else {
                    Arc::clone(entry.get())
                }
            }
            Entry::Vacant(entry) => {
                let fresh = self.spawn_container(workspace);
                let _ = entry.insert(Arc::clone(&fresh));
                fresh
            }
        }
    }

    fn spawn_container(&self, workspace: &str) -> Arc<SessionContainer> {
        let container = Arc::new(SessionContainer::new(
            workspace,
            Arc::clone(&self.operations),
            self.limiter.clone(),
            Arc::clone(&self.ids),
        ));

        let map: Weak<ContainerMap> = Arc::downgrade(&self.containers);
        let key = workspace.to_owned();
        let id = container.id().clone();
        container.on_terminated(Box::new(move || {
            if let Some(map) = map.upgrade() {
                let _ = map.remove_if(&key, |_, c| c.id() == &id);
            }
        }));

        info!(container_id = %container.id(), workspace, "container created");
        container
    }

    pub fn get(&self, workspace: &str) -> Option<Arc<SessionContainer>> {
        self.containers
            .get(workspace)
            .map(|c| Arc::clone(c.value()))
            .filter(|c| !c.is_terminated())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    pub fn ids(&self) -> &Arc<MessageIdAllocator> {
        &self.ids
    }

    /// Terminate containers with no clients that have been idle for at
    /// least `max_idle`. Returns how many were terminated.
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<Arc<SessionContainer>> = self
            .containers
            .iter()
            .filter(|c| c.client_count() == 0 && c.idle_for() >= max_idle)
            .map(|c| Arc::clone(c.value()))
            .collect();

        for container in &idle {
            debug!(container_id = %container.id(), "reaping idle container");
            container.terminate().await;
        }
        idle.len()
    }

    /// Terminate every container. Returns how many were terminated.
    pub async fn terminate_all(&self) -> usize {
        let all: Vec<Arc<SessionContainer>> =
            self.containers.iter().map(|c| Arc::clone(c.value())).collect();
        for container in &all {
            container.terminate().await;
        }
        all.len()
    }
}

/// Periodically reap idle containers until `cancel` fires.
pub fn start_reaper(
    manager: Arc<ContainerManager>,
    interval: Duration,
    max_idle: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = manager.reap_idle(max_idle).await;
                    if reaped > 0 {
                        info!(reaped, remaining = manager.len(), "reaped idle containers");
                    }
                }
            }
        }
    })
}
