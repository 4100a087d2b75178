//! Concurrency cap for expensive operations against a shared resource.
//!
//! Excess work waits; it is never rejected. Waiters are not queued in
//! arrival order: when a slot frees, every waiter re-checks capacity and the
//! first one to observe a free slot takes it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of a capacity query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of concurrently running operations.
    pub rate: usize,
}

type CapacityQuery = Arc<dyn Fn() -> RateLimit + Send + Sync>;

struct Inner {
    capacity: CapacityQuery,
    /// In-flight slots and when each was admitted.
    slots: Mutex<HashMap<u64, Instant>>,
    released: Notify,
    next_slot: AtomicU64,
}

/// Cheap-to-clone handle; clones share the same slot table.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

/// One admitted operation. Dropping it frees the slot, whether the operation
/// finished, failed, or was cancelled.
struct Slot {
    id: u64,
    inner: Arc<Inner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let _ = self.inner.slots.lock().remove(&self.id);
        self.inner.released.notify_waiters();
    }
}

impl RateLimiter {
    /// Limiter with a fixed capacity.
    pub fn new(rate: usize) -> Self {
        Self::with_capacity(move || RateLimit { rate })
    }

    /// Limiter whose capacity is re-read on every admission decision.
    pub fn with_capacity(query: impl Fn() -> RateLimit + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: Arc::new(query),
                slots: Mutex::new(HashMap::new()),
                released: Notify::new(),
                next_slot: AtomicU64::new(0),
            }),
        }
    }

    /// Run `op` once a slot is free and return its own outcome.
    pub async fn execute<F, Fut>(&self, op: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _slot = self.acquire().await;
        op().await
    }

    /// Start `op` in the background once a slot is free.
    ///
    /// Suspends only until admission. Failures are logged at `error` level.
    pub async fn submit<F, Fut, T, E>(&self, op: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.submit_with_handler(op, |err| {
            tracing::error!(error = %err, "rate-limited operation failed");
        })
        .await;
    }

    /// Like [`submit`](Self::submit), routing failures to `on_error`.
    pub async fn submit_with_handler<F, Fut, T, E, H>(&self, op: F, on_error: H)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        H: FnOnce(E) + Send + 'static,
    {
        let slot = self.acquire().await;
        let fut = op();
        drop(tokio::spawn(async move {
            let _slot = slot;
            if let Err(err) = fut.await {
                on_error(err);
            }
        }));
    }

    /// Wait until at least one in-flight operation completes.
    ///
    /// Returns immediately when nothing is in flight. Use
    /// [`wait_idle`](Self::wait_idle) to wait for all of them.
    pub async fn drain(&self) {
        let released = self.inner.released.notified();
        tokio::pin!(released);
        released.as_mut().enable();
        if self.in_flight() == 0 {
            return;
        }
        released.await;
    }

    /// Wait until no operation is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            released.await;
        }
    }

    /// Wake waiters so they re-read capacity. Call after raising the rate.
    pub fn recheck(&self) {
        self.inner.released.notify_waiters();
    }

    /// Operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Current answer of the capacity query.
    pub fn rate(&self) -> usize {
        (self.inner.capacity)().rate
    }

    /// Total operations admitted since creation.
    pub fn admitted_total(&self) -> u64 {
        self.inner.next_slot.load(Ordering::Relaxed)
    }

    async fn acquire(&self) -> Slot {
        loop {
            // Register interest before checking so a release between the
            // check and the await is not lost.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(slot) = self.try_admit() {
                return slot;
            }
            released.await;
        }
    }

    /// Admit and register under one lock, with no await in between.
    fn try_admit(&self) -> Option<Slot> {
        let rate = (self.inner.capacity)().rate;
        let mut slots = self.inner.slots.lock();
        if slots.len() >= rate {
            return None;
        }
        let id = self.inner.next_slot.fetch_add(1, Ordering::Relaxed);
        let _ = slots.insert(id, Instant::now());
        Some(Slot {
            id,
            inner: Arc::clone(&self.inner),
        })
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use futures::future::join_all;
    use std::time::Duration;

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test]
    async fn execute_returns_operation_result() {
        let limiter = RateLimiter::new(1);
        let result = limiter.execute(|| async { 42 }).await;
        assert_eq!(result, 42);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.admitted_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_rate() {
        let limiter = RateLimiter::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ops = (0..20).map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let limiter = limiter.clone();
            async move {
                limiter
                    .execute(|| async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        let _ = peak.fetch_max(now, Ordering::SeqCst);
                        assert!(limiter.in_flight() <= 3);
                        sleep_ms(10).await;
                        let _ = running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }
        });
        join_all(ops).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.admitted_total(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn five_ops_at_rate_two_take_three_rounds() {
        let limiter = RateLimiter::new(2);
        let start = tokio::time::Instant::now();

        let ops = (0..5).map(|i| {
            let limiter = limiter.clone();
            async move {
                limiter
                    .execute(|| async move {
                        sleep_ms(50).await;
                        Ok::<_, String>(i)
                    })
                    .await
            }
        });
        let results = join_all(ops).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "took {elapsed:?}");
        assert!(elapsed < Duration::from_millis(160), "took {elapsed:?}");
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn failing_operation_frees_its_slot() {
        let limiter = RateLimiter::new(1);
        let failed: Result<(), String> = limiter.execute(|| async { Err("boom".into()) }).await;
        assert_eq!(failed.unwrap_err(), "boom");
        assert_eq!(limiter.in_flight(), 0);

        let ok = limiter.execute(|| async { "after" }).await;
        assert_eq!(ok, "after");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_execute_frees_its_slot() {
        let limiter = RateLimiter::new(1);
        let res = tokio::time::timeout(
            Duration::from_millis(10),
            limiter.execute(|| sleep_ms(1_000)),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_returns_before_completion() {
        let limiter = RateLimiter::new(1);
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);

        limiter
            .submit(|| async move {
                sleep_ms(20).await;
                let _ = flag.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.in_flight(), 1);

        limiter.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_blocks_until_a_slot_frees() {
        let limiter = RateLimiter::new(1);
        limiter
            .submit(|| async {
                sleep_ms(50).await;
                Ok::<_, String>(())
            })
            .await;

        let start = tokio::time::Instant::now();
        limiter.submit(|| async { Ok::<_, String>(()) }).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn submit_errors_reach_handler_not_submitter() {
        let limiter = RateLimiter::new(2);
        let (tx, rx) = tokio::sync::oneshot::channel();

        limiter
            .submit_with_handler(
                || async { Err::<(), _>("background failure".to_string()) },
                move |err| {
                    let _ = tx.send(err);
                },
            )
            .await;

        assert_eq!(rx.await.unwrap(), "background failure");
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_idle() {
        let limiter = RateLimiter::new(1);
        limiter.drain().await;
        limiter.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_first_completion_only() {
        let limiter = RateLimiter::new(2);
        limiter
            .submit(|| async {
                sleep_ms(10).await;
                Ok::<_, String>(())
            })
            .await;
        limiter
            .submit(|| async {
                sleep_ms(50).await;
                Ok::<_, String>(())
            })
            .await;

        let start = tokio::time::Instant::now();
        limiter.drain().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(50));
        assert_eq!(limiter.in_flight(), 1);

        limiter.wait_idle().await;
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_reread_on_each_admission() {
        let capacity = Arc::new(AtomicUsize::new(1));
        let query = Arc::clone(&capacity);
        let limiter = RateLimiter::with_capacity(move || RateLimit {
            rate: query.load(Ordering::SeqCst),
        });

        limiter
            .submit(|| async {
                sleep_ms(1_000).await;
                Ok::<_, String>(())
            })
            .await;

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.execute(|| async { "admitted" }).await })
        };
        sleep_ms(10).await;
        assert!(!waiter.is_finished());

        capacity.store(2, Ordering::SeqCst);
        limiter.recheck();
        let result = tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .expect("waiter admitted after capacity raise")
            .unwrap();
        assert_eq!(result, "admitted");
        assert_eq!(limiter.rate(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_admits_nothing() {
        let limiter = RateLimiter::new(0);
        let res = tokio::time::timeout(
            Duration::from_millis(100),
            limiter.execute(|| async { "never" }),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(limiter.admitted_total(), 0);
    }
}
