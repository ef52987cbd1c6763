//! Worker loops draining a [`WorkQueue`].
//!
//! One sync per key at a time; failures are requeued with the queue's
//! exponential backoff until `max_retries`, after which the error goes to the
//! error sink and the key is re-added once after `drop_requeue_delay`.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Failures tolerated before a key is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// Delay before a dropped key is tried again
pub const DEFAULT_DROP_REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Receives errors of keys that exhausted their retries
pub type ErrorSink = Arc<dyn Fn(&str, &ControllerError) + Send + Sync>;

/// Drives one queue
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<WorkQueue>,
    max_retries: u32,
    drop_requeue_delay: Duration,
    error_sink: ErrorSink,
    metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.queue.name())
            .field("max_retries", &self.max_retries)
            .field("drop_requeue_delay", &self.drop_requeue_delay)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher for `queue` with default retry limits and no metrics
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        let name = queue.name().to_string();
        Self {
            queue,
            max_retries: DEFAULT_MAX_RETRIES,
            drop_requeue_delay: DEFAULT_DROP_REQUEUE_DELAY,
            error_sink: Arc::new(move |key, err| {
                error!("Dropping {} {:?} out of the queue: {}", name, key, err);
            }),
            metrics: None,
        }
    }

    /// Failures tolerated before a key is dropped
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before a dropped key is queued again
    pub fn with_drop_requeue_delay(mut self, delay: Duration) -> Self {
        self.drop_requeue_delay = delay;
        self
    }

    /// Report keys that exhausted their retries to `sink`
    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = sink;
        self
    }

    /// Record sync outcomes and durations
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The queue this dispatcher drains
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Process keys until the queue shuts down
    pub async fn run_worker<F, Fut>(&self, sync: F)
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<(), ControllerError>>,
    {
        while self.process_next_work_item(&sync).await {}
        debug!("Worker for {} queue stopped", self.queue.name());
    }

    /// Handle one key. Returns false once the queue has shut down.
    pub async fn process_next_work_item<F, Fut>(&self, sync: &F) -> bool
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<(), ControllerError>>,
    {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = sync(key.clone()).await;
        self.handle_err(&key, result);
        self.queue.done(&key);
        true
    }

    fn record_sync(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_sync(self.queue.name(), result);
        }
    }

    fn handle_err(&self, key: &str, result: Result<(), ControllerError>) {
        let err = match result {
            Ok(()) => {
                self.record_sync("success");
                self.queue.forget(key);
                return;
            }
            Err(err) => err,
        };

        if err.is_terminal() {
            self.record_sync("terminal");
            warn!("Not retrying {} {:?}: {}", self.queue.name(), key, err);
            self.queue.forget(key);
            return;
        }

        self.record_sync("error");
        if self.queue.num_requeues(key) < self.max_retries {
            debug!("Error syncing {} {:?}: {}", self.queue.name(), key, err);
            if let Some(metrics) = &self.metrics {
                metrics.record_requeue(self.queue.name());
            }
            self.queue.add_rate_limited(key);
            return;
        }

        (self.error_sink)(key, &err);
        if let Some(metrics) = &self.metrics {
            metrics.record_dropped(self.queue.name());
        }
        self.queue.forget(key);
        self.queue.add_after(key, self.drop_requeue_delay);
    }
}
