use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AnalyticsEvent, AnalyticsSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff_base: Duration::from_millis(200) }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue was full and its oldest event was discarded to make room.
    DroppedOldest,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub delivered: u64,
    pub dropped_backpressure: u64,
    pub dropped_after_retries: u64,
}

/// Bounded, non-blocking hand-off between the signal path and an [`AnalyticsSink`].
#[derive(Clone)]
pub struct AnalyticsDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    delivered: AtomicU64,
    dropped_backpressure: AtomicU64,
    dropped_after_retries: AtomicU64,
}

impl AnalyticsDispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                capacity: capacity.max(1),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                dropped_backpressure: AtomicU64::new(0),
                dropped_after_retries: AtomicU64::new(0),
            }),
        }
    }

    pub fn enqueue(&self, event: AnalyticsEvent) -> EnqueueOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return EnqueueOutcome::Closed;
        }

        let dropped = {
            let mut queue = self.inner.lock_queue();
            let dropped = if queue.len() >= self.inner.capacity { queue.pop_front() } else { None };
            queue.push_back(event);
            dropped
        };
        self.inner.notify.notify_one();

        match dropped {
            Some(oldest) => {
                self.inner.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_name = "engine.analytics.dropped",
                    reason = "backpressure",
                    event_id = %oldest.event_id,
                    user_id = %oldest.user_id,
                    "analytics queue full, dropped oldest event"
                );
                EnqueueOutcome::DroppedOldest
            }
            None => EnqueueOutcome::Queued,
        }
    }

    pub fn pending(&self) -> Vec<AnalyticsEvent> {
        self.inner.lock_queue().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped_backpressure: self.inner.dropped_backpressure.load(Ordering::Relaxed),
            dropped_after_retries: self.inner.dropped_after_retries.load(Ordering::Relaxed),
        }
    }

    /// Drops events for `user_id` that have not been delivered yet.
    pub fn discard_user_events(&self, user_id: &str) -> usize {
        let mut queue = self.inner.lock_queue();
        let before = queue.len();
        queue.retain(|event| event.user_id.as_str() != user_id);
        before - queue.len()
    }

    /// Stops accepting events. The worker drains what is already queued, then exits.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    pub fn spawn_worker(&self, sink: Arc<dyn AnalyticsSink>, policy: RetryPolicy) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let next = inner.lock_queue().pop_front();
                match next {
                    Some(event) => inner.deliver_with_retry(sink.as_ref(), &event, policy).await,
                    None if inner.closed.load(Ordering::Acquire) => break,
                    None => inner.notify.notified().await,
                }
            }
            debug!(event_name = "engine.analytics.worker_stopped", "analytics worker stopped");
        })
    }
}

impl DispatcherInner {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<AnalyticsEvent>> {
        match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn deliver_with_retry(
        &self,
        sink: &dyn AnalyticsSink,
        event: &AnalyticsEvent,
        policy: RetryPolicy,
    ) {
        let mut attempt = 0;
        loop {
            match sink.deliver(event).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(error) if attempt < policy.max_retries => {
                    debug!(
                        event_name = "engine.analytics.retry",
                        event_id = %event.event_id,
                        attempt,
                        error = %error,
                        "analytics delivery failed, retrying"
                    );
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                    attempt += 1;
                }
                Err(error) => {
                    self.dropped_after_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_name = "engine.analytics.dropped",
                        reason = "retries_exhausted",
                        event_id = %event.event_id,
                        user_id = %event.user_id,
                        attempts = attempt + 1,
                        error = %error,
                        "analytics delivery failed permanently"
                    );
                    return;
                }
            }
        }
    }
}
