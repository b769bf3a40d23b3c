//! Process-wide request counters.
//!
//! The counters live in their own [`prometheus::Registry`] so the debug
//! listener can expose exactly these series and nothing else.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Shared by every request; all updates are atomic.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounter,
    errors: IntCounter,
    panics: IntCounter,
    workers: IntGauge,
    /// Request sequence; each caller of `add_request` gets a distinct value.
    sequence: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("warden".into()), None)?;

        let requests = IntCounter::new("requests", "Requests that reached the metrics layer")?;
        let errors = IntCounter::new("errors", "Requests whose handler chain returned an error")?;
        let panics = IntCounter::new("panics", "Handler panics recovered")?;
        let workers = IntGauge::new("workers", "Alive runtime tasks, sampled every 1000 requests")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(panics.clone()))?;
        registry.register(Box::new(workers.clone()))?;

        let sequence = Arc::new(AtomicU64::new(0));
        Ok(Self { registry, requests, errors, panics, workers, sequence })
    }

    /// Increments the request counter and returns this request's sequence
    /// number. Concurrent callers never see the same number.
    pub fn add_request(&self) -> u64 {
        self.requests.inc();
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_error(&self) -> u64 {
        self.errors.inc();
        self.errors.get()
    }

    pub fn add_panic(&self) -> u64 {
        self.panics.inc();
        self.panics.get()
    }

    pub fn set_workers(&self, n: usize) {
        self.workers.set(i64::try_from(n).unwrap_or(i64::MAX));
    }

    pub fn requests(&self) -> u64 { self.requests.get() }
    pub fn errors(&self) -> u64 { self.errors.get() }
    pub fn panics(&self) -> u64 { self.panics.get() }
    pub fn workers(&self) -> i64 { self.workers.get() }

    /// Prometheus text exposition of every series.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .field("panics", &self.panics())
            .field("workers", &self.workers())
            .finish()
    }
}
