//! Deduplicating, rate-limited work queue
//!
//! Holds at most one pending entry per key. A key added while it is being
//! processed is parked in the dirty set and handed out again once the worker
//! calls [`WorkQueue::done`]. This gives exactly one in-flight sync per key
//! without any lock held across the sync itself.

use crate::backoff::ItemExponentialBackoff;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    // keys waiting to be processed (queued, or re-added while processing)
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Per-key work queue drained by one or more workers
#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    rate_limiter: ItemExponentialBackoff,
}

impl WorkQueue {
    /// Queue with the default per-key backoff
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, ItemExponentialBackoff::default())
    }

    /// Queue with a custom per-key backoff
    pub fn with_rate_limiter(name: impl Into<String>, rate_limiter: ItemExponentialBackoff) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            rate_limiter,
        }
    }

    /// Name used in logs and metrics
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `key` unless it is already pending
    pub fn add(&self, key: &str) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            // picked up again by done()
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    // more work left: make sure another waiter wakes up
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                // register before releasing the lock so a concurrent add is not missed
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Mark `key` as processed; re-queues it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Add `key` after its per-key backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = self.rate_limiter.when(key);
        debug!("Requeueing {} on {} in {:?}", key, self.name, delay);
        self.add_after(key, delay);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    /// Reset the backoff of `key`
    pub fn forget(&self, key: &str) {
        self.rate_limiter.forget(key);
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Whether `shut_down` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = WorkQueue::new("test");
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("a"));
        assert_eq!(queue.get().await.as_deref(), Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_after_done() {
        let queue = WorkQueue::new("test");
        queue.add("a");
        let key = queue.get().await.unwrap();

        // not handed out twice while in flight
        queue.add("a");
        queue.add("a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("a"));
        queue.done("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = Arc::new(WorkQueue::new("test"));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("late");
        assert_eq!(waiter.await.unwrap().as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let queue = Arc::new(WorkQueue::new("test"));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("ignored");
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_add_after_delay() {
        let queue = Arc::new(WorkQueue::new("test"));
        queue.add_after("later", Duration::from_millis(10));
        assert!(queue.is_empty());
        let key = tokio::time::timeout(Duration::from_secs(2), queue.get())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("later"));
    }

    #[tokio::test]
    async fn test_rate_limited_counts_requeues() {
        let queue = Arc::new(WorkQueue::new("test"));
        queue.add_rate_limited("a");
        queue.add_rate_limited("a");
        assert_eq!(queue.num_requeues("a"), 2);
        queue.forget("a");
        assert_eq!(queue.num_requeues("a"), 0);
    }
}
