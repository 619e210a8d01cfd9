//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Aggregate gateway counters and response times for point-in-time snapshots
//! - Mirror every observation into the `metrics` facade
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route and outcome
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): admission denials by endpoint
//! - `gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_cache_events_total` (counter): hits, misses, evictions
//! - `gateway_ws_connections` (gauge): active real-time connections

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

/// Outcome of a request as seen by metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

#[derive(Debug, Default)]
struct ServiceCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    latency_total_ms: AtomicU64,
}

/// Counters and timers shared by every gateway subsystem.
#[derive(Debug)]
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
    cache_hits: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
    sample_capacity: usize,
    services: DashMap<String, ServiceCounters>,
    ws_messages: AtomicU64,
}

impl MetricsAggregator {
    /// Create an aggregator keeping at most `sample_capacity` response times.
    pub fn new(sample_capacity: usize) -> Self {
        let sample_capacity = sample_capacity.max(1);
        Self {
            total_requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(sample_capacity)),
            sample_capacity,
            services: DashMap::new(),
            ws_messages: AtomicU64::new(0),
        }
    }

    /// Record a completed request on `route`.
    pub fn record_request(&self, route: &str, outcome: Outcome, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Success => self.successes.fetch_add(1, Ordering::Relaxed),
            Outcome::Failure => self.failures.fetch_add(1, Ordering::Relaxed),
        };
        self.push_sample(elapsed);

        counter!(
            "gateway_requests_total",
            "route" => route.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!("gateway_request_duration_seconds", "route" => route.to_string())
            .record(elapsed.as_secs_f64());
    }

    /// Record a request served from the response cache.
    pub fn record_cache_hit(&self, route: &str, elapsed: Duration) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.record_request(route, Outcome::Success, elapsed);
    }

    /// Record a request rejected before reaching an upstream (404, 401, 503).
    pub fn record_rejected(&self, reason: &'static str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_rejected_total", "reason" => reason).increment(1);
    }

    /// Record an admission denial.
    pub fn record_rate_limited(&self, endpoint: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_rate_limited_total", "endpoint" => endpoint.to_string()).increment(1);
    }

    /// Record one upstream call outcome for `service_id`.
    pub fn record_upstream(&self, service_id: &str, success: bool, latency: Duration) {
        let entry = self.services.entry(service_id.to_string()).or_default();
        entry.calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            entry.failures.fetch_add(1, Ordering::Relaxed);
        }
        entry
            .latency_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_breaker_state(&self, service_id: &str, state: u8) {
        gauge!("gateway_breaker_state", "service" => service_id.to_string()).set(state as f64);
    }

    pub fn record_cache_event(&self, event: &'static str) {
        counter!("gateway_cache_events_total", "event" => event).increment(1);
    }

    pub fn record_ws_connections(&self, active: usize) {
        gauge!("gateway_ws_connections").set(active as f64);
    }

    pub fn record_ws_message(&self) {
        self.ws_messages.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_ws_messages_total").increment(1);
    }

    fn push_sample(&self, elapsed: Duration) {
        let mut samples = self.samples.lock().expect("metrics sample mutex poisoned");
        if samples.len() == self.sample_capacity {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_millis() as u64);
    }

    /// Point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<u64> = {
            let samples = self.samples.lock().expect("metrics sample mutex poisoned");
            samples.iter().copied().collect()
        };
        sorted.sort_unstable();

        let average_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        let mut services: Vec<ServiceSnapshot> = self
            .services
            .iter()
            .map(|entry| {
                let calls = entry.calls.load(Ordering::Relaxed);
                let total = entry.latency_total_ms.load(Ordering::Relaxed);
                ServiceSnapshot {
                    service_id: entry.key().clone(),
                    calls,
                    failures: entry.failures.load(Ordering::Relaxed),
                    average_latency_ms: if calls == 0 { 0.0 } else { total as f64 / calls as f64 },
                }
            })
            .collect();
        services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            ws_messages: self.ws_messages.load(Ordering::Relaxed),
            samples: sorted.len(),
            average_ms,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            services,
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub service_id: String,
    pub calls: u64,
    pub failures: u64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub rejected: u64,
    pub cache_hits: u64,
    pub ws_messages: u64,
    pub samples: usize,
    pub average_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub services: Vec<ServiceSnapshot>,
}
