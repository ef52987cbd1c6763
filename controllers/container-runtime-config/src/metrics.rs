//! Prometheus metrics for the sync queues
//!
//! - `ctrcfg_sync_total{queue,result}` - sync attempts by outcome (`success`, `error`, `terminal`)
//! - `ctrcfg_requeue_total{queue}` - keys re-added with backoff after a failure
//! - `ctrcfg_dropped_total{queue}` - keys dropped after exhausting their retries

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters shared by every dispatch queue
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    syncs: IntCounterVec,
    requeues: IntCounterVec,
    dropped: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let syncs = IntCounterVec::new(
            Opts::new("ctrcfg_sync_total", "Synchronization attempts by queue and result"),
            &["queue", "result"],
        )?;
        let requeues = IntCounterVec::new(
            Opts::new("ctrcfg_requeue_total", "Keys requeued with backoff after a failed sync"),
            &["queue"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new("ctrcfg_dropped_total", "Keys dropped after exhausting their retries"),
            &["queue"],
        )?;

        registry.register(Box::new(syncs.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            registry,
            syncs,
            requeues,
            dropped,
        })
    }

    pub fn record_sync(&self, queue: &str, result: &str) {
        self.syncs.with_label_values(&[queue, result]).inc();
    }

    pub fn record_requeue(&self, queue: &str) {
        self.requeues.with_label_values(&[queue]).inc();
    }

    pub fn record_dropped(&self, queue: &str) {
        self.dropped.with_label_values(&[queue]).inc();
    }

    pub fn sync_count(&self, queue: &str, result: &str) -> u64 {
        self.syncs.with_label_values(&[queue, result]).get()
    }

    pub fn dropped_count(&self, queue: &str) -> u64 {
        self.dropped.with_label_values(&[queue]).get()
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_sync("containerruntimeconfig", "success");
        metrics.record_sync("containerruntimeconfig", "success");
        metrics.record_dropped("image");

        assert_eq!(metrics.sync_count("containerruntimeconfig", "success"), 2);
        let text = metrics.render().unwrap();
        assert!(text.contains("ctrcfg_sync_total"));
        assert!(text.contains("ctrcfg_dropped_total{queue=\"image\"} 1"));
    }
}
