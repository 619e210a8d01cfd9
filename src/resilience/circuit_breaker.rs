//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: a single probe is testing whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: open_timeout elapsed since the last failure (one probe)
//! Half-Open → Closed: probe succeeds (failure count reset)
//! Half-Open → Open: probe fails (timeout restarts)
//! ```
//!
//! Only the probe's outcome moves a Half-Open breaker. Results of calls
//! admitted earlier that land while Open or Half-Open only update counts.
//!
//! One breaker per upstream service, created on first use. Each breaker has
//! its own lock, so unrelated services never contend. The probe slot is
//! claimed under that lock, which is what keeps racing callers from sending
//! more than one probe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::{BreakerSettings, CircuitBreakerConfig};
use crate::observability::MetricsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<u64>,
    probe_in_flight: bool,
}

#[derive(Debug)]
struct Breaker {
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl Breaker {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn open_timeout_ms(&self) -> u64 {
        self.settings.open_timeout_secs.saturating_mul(1_000)
    }
}

/// Answer to an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Admitted as the single half-open probe.
    Probe,
    Denied,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Denied)
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub service_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<u64>,
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    pub probe_in_flight: bool,
}

/// Registry of per-service breakers.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<Breaker>>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    metrics: Arc<MetricsAggregator>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
            metrics,
        }
    }

    fn breaker(&self, service_id: &str) -> Arc<Breaker> {
        if let Some(breaker) = self.breakers.get(service_id) {
            return breaker.clone();
        }
        self.breakers
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(self.config.settings_for(service_id))))
            .clone()
    }

    fn transition(&self, service_id: &str, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        tracing::info!(
            service = %service_id,
            from = ?inner.state,
            to = ?to,
            failures = inner.failure_count,
            "Circuit breaker transition"
        );
        inner.state = to;
        self.metrics.record_breaker_state(service_id, to.gauge_value());
    }

    /// Whether a call to `service_id` may proceed now.
    pub fn allow(&self, service_id: &str) -> bool {
        self.admit(service_id).is_admitted()
    }

    /// Like [`BreakerRegistry::allow`], but tells the caller whether it holds
    /// the half-open probe slot and therefore owes a result or a release.
    pub fn admit(&self, service_id: &str) -> Admission {
        let breaker = self.breaker(service_id);
        let mut inner = breaker.inner.lock().expect("circuit breaker mutex poisoned");

        let state = inner.state;
        match state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::HalfOpen => Admission::Denied,
            CircuitState::Open => {
                let now = self.clock.now_millis();
                let since_failure = now.saturating_sub(inner.last_failure_at.unwrap_or(now));
                if since_failure >= breaker.open_timeout_ms() && !inner.probe_in_flight {
                    inner.probe_in_flight = true;
                    self.transition(service_id, &mut inner, CircuitState::HalfOpen);
                    tracing::debug!(service = %service_id, "Admitting half-open probe");
                    Admission::Probe
                } else {
                    Admission::Denied
                }
            }
        }
    }

    /// Record the final outcome of a call admitted as [`Admission::Admitted`].
    ///
    /// Only the probe decides a half-open circuit, so a late result landing
    /// while Open or Half-Open just updates counts.
    pub fn record_result(&self, service_id: &str, success: bool, latency: Duration) {
        self.metrics.record_upstream(service_id, success, latency);

        let breaker = self.breaker(service_id);
        let mut inner = breaker.inner.lock().expect("circuit breaker mutex poisoned");

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.failure_count = 0,
            (CircuitState::Closed, false) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(self.clock.now_millis());
                if inner.failure_count >= breaker.settings.failure_threshold {
                    self.transition(service_id, &mut inner, CircuitState::Open);
                }
            }
            (CircuitState::Open | CircuitState::HalfOpen, true) => {}
            (CircuitState::Open | CircuitState::HalfOpen, false) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
            }
        }
    }

    /// Record the outcome of the half-open probe. Normally reached through
    /// [`ProbeGuard::complete`].
    pub fn record_probe_result(&self, service_id: &str, success: bool, latency: Duration) {
        let breaker = self.breaker(service_id);
        let mut inner = breaker.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state != CircuitState::HalfOpen || !inner.probe_in_flight {
            drop(inner);
            self.record_result(service_id, success, latency);
            return;
        }

        self.metrics.record_upstream(service_id, success, latency);
        inner.probe_in_flight = false;
        if success {
            inner.failure_count = 0;
            self.transition(service_id, &mut inner, CircuitState::Closed);
        } else {
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure_at = Some(self.clock.now_millis());
            self.transition(service_id, &mut inner, CircuitState::Open);
        }
    }

    /// Release a probe whose caller went away without an outcome.
    ///
    /// The breaker returns to Open with its failure time unchanged, so the
    /// next `allow` can admit a fresh probe right away.
    pub fn abandon_probe(&self, service_id: &str) {
        let breaker = self.breaker(service_id);
        let mut inner = breaker.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::debug!(service = %service_id, "Half-open probe abandoned");
            self.transition(service_id, &mut inner, CircuitState::Open);
        }
    }

    pub fn snapshot(&self, service_id: &str) -> BreakerSnapshot {
        let breaker = self.breaker(service_id);
        let inner = breaker.inner.lock().expect("circuit breaker mutex poisoned");
        BreakerSnapshot {
            service_id: service_id.to_string(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            failure_threshold: breaker.settings.failure_threshold,
            open_timeout_secs: breaker.settings.open_timeout_secs,
            probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Snapshots of every breaker created so far, sorted by service.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut ids: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids.iter().map(|id| self.snapshot(id)).collect()
    }

    /// Snapshot only if the breaker already exists.
    pub fn existing_snapshot(&self, service_id: &str) -> Option<BreakerSnapshot> {
        if self.breakers.contains_key(service_id) {
            Some(self.snapshot(service_id))
        } else {
            None
        }
    }
}

/// Releases a half-open probe if dropped before [`ProbeGuard::complete`].
///
/// Held by the gateway across the upstream call so that a cancelled request
/// never leaves its breaker stuck in Half-Open.
#[derive(Debug)]
pub struct ProbeGuard {
    registry: Arc<BreakerRegistry>,
    service_id: String,
    armed: bool,
}

impl ProbeGuard {
    pub fn new(registry: Arc<BreakerRegistry>, service_id: impl Into<String>) -> Self {
        Self {
            registry,
            service_id: service_id.into(),
            armed: true,
        }
    }

    /// Record the call's final outcome and disarm the guard.
    pub fn complete(mut self, success: bool, latency: Duration) {
        self.armed = false;
        self.registry.record_probe_result(&self.service_id, success, latency);
    }

    /// Disarm without recording (e.g. the request was served elsewhere).
    pub fn release(mut self) {
        self.armed = false;
        self.registry.abandon_probe(&self.service_id);
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon_probe(&self.service_id);
        }
    }
}
