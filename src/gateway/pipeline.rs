//! Request pipeline.
//!
//! Every request goes through the same ordered checks. Each rejection is
//! recorded in metrics and returned as a typed [`GatewayError`]; nothing after
//! the rejecting step runs.
//!
//! The circuit breaker sees exactly one result per admitted request: the
//! final outcome after retries. A half-open probe is held in a
//! [`ProbeGuard`], so dropping the request future mid-call releases the probe
//! instead of leaving the breaker stuck in Half-Open.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::http::Method;

use crate::cache::{CacheManager, CacheStats, MemoryStore};
use crate::clock::SharedClock;
use crate::config::{GatewayConfig, RateLimitRule, RetryConfig};
use crate::gateway::GatewayError;
use crate::observability::{MetricsAggregator, MetricsSnapshot, Outcome};
use crate::resilience::{call_with_retries, Admission, BreakerRegistry, CallFailure, CircuitState, ProbeGuard};
use crate::routing::{RouteError, RouteTable, RuleTable, ServiceRoute};
use crate::security::identity::{AuthError, Identity, IdentityValidator};
use crate::security::rate_limit::{scope_key, RateLimitDecision, RateLimiter};
use crate::upstream::{is_identity_header, Upstream, UpstreamRequest, UpstreamResponse, X_IDENTITY_ID, X_ROOM_ID};

/// A request as the gateway sees it, independent of the HTTP server.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub credential: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub request_id: Option<String>,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            credential: None,
            client_ip: None,
            headers: Vec::new(),
            body: Vec::new(),
            request_id: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// The request pipeline and the services it coordinates.
pub struct Gateway {
    routes: RouteTable,
    rules: RuleTable,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    cache: CacheManager,
    metrics: Arc<MetricsAggregator>,
    upstream: Arc<dyn Upstream>,
    identity: Arc<dyn IdentityValidator>,
    retry: RetryConfig,
}

impl Gateway {
    /// Build a gateway with in-memory cache, limiter and breakers from
    /// `config`, registering its routes and rate limit rules.
    pub fn from_config(
        config: &GatewayConfig,
        clock: SharedClock,
        upstream: Arc<dyn Upstream>,
        identity: Arc<dyn IdentityValidator>,
    ) -> Result<Self, RouteError> {
        let metrics = Arc::new(MetricsAggregator::new(config.observability.latency_samples));
        let store = Arc::new(MemoryStore::new(config.cache.capacity, clock.clone()));
        let cache = CacheManager::new(store).with_metrics(metrics.clone());
        let breakers = Arc::new(BreakerRegistry::new(
            config.circuit_breaker.clone(),
            clock.clone(),
            metrics.clone(),
        ));

        let gateway = Self {
            routes: RouteTable::new(),
            rules: RuleTable::new(),
            limiter: Arc::new(RateLimiter::new(clock)),
            breakers,
            cache,
            metrics,
            upstream,
            identity,
            retry: config.retries.clone(),
        };

        for route in &config.routes {
            gateway.register_route(ServiceRoute::from(route))?;
        }
        for rule in &config.rate_limits {
            gateway.register_rate_limit(rule.clone());
        }

        tracing::info!(
            routes = gateway.routes.len(),
            rules = config.rate_limits.len(),
            "Gateway initialized"
        );
        Ok(gateway)
    }

    pub fn register_route(&self, route: ServiceRoute) -> Result<(), RouteError> {
        self.routes.register(route)
    }

    pub fn register_rate_limit(&self, rule: RateLimitRule) {
        self.rules.register(rule);
    }

    /// Run `request` through the pipeline.
    pub async fn handle_request(&self, request: GatewayRequest) -> Result<UpstreamResponse, GatewayError> {
        let started = Instant::now();

        let Some(route) = self.routes.resolve(&request.path) else {
            self.metrics.record_rejected("not_found");
            tracing::debug!(path = %request.path, "No route matched");
            return Err(GatewayError::NotFound { path: request.path });
        };

        let identity = self.authenticate(&route, request.credential.as_deref()).await?;

        if let Some(rule) = self.rule_for(&route, &request.path) {
            let key = scope_key(
                &rule,
                identity.as_ref().map(|i| i.identity_id.as_str()),
                request.client_ip,
            );
            if let RateLimitDecision::Denied { retry_after, .. } = self.limiter.check(&key, &rule) {
                self.metrics.record_rate_limited(&rule.endpoint);
                tracing::warn!(
                    route = %route.id,
                    key = %key,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                return Err(GatewayError::RateLimited { retry_after });
            }
        }

        let admission = if route.circuit_breaker_enabled {
            self.breakers.admit(&route.service_id)
        } else {
            Admission::Admitted
        };
        if !admission.is_admitted() {
            self.metrics.record_rejected("circuit_open");
            tracing::warn!(route = %route.id, service = %route.service_id, "Circuit open, failing fast");
            return Err(GatewayError::ServiceUnavailable {
                service_id: route.service_id.clone(),
            });
        }
        let probe = (admission == Admission::Probe)
            .then(|| ProbeGuard::new(self.breakers.clone(), route.service_id.as_str()));

        let cache_key = cache_key(&route, &request, identity.as_ref());
        if let Some(key) = &cache_key {
            match self.cache.get_value::<UpstreamResponse>(&route.id, key).await {
                Ok(Some(response)) => {
                    if let Some(probe) = probe {
                        probe.release();
                    }
                    self.metrics.record_cache_hit(&route.id, started.elapsed());
                    tracing::debug!(route = %route.id, key = %key, "Served from cache");
                    return Ok(response);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(route = %route.id, error = %e, "Cache read failed, forwarding"),
            }
        }

        let path_and_query = request.path_and_query();
        let mut headers: Vec<(String, String)> = request
            .headers
            .into_iter()
            .filter(|(name, _)| !is_identity_header(name))
            .collect();
        if let Some(identity) = &identity {
            headers.push((X_IDENTITY_ID.to_string(), identity.identity_id.clone()));
            headers.push((X_ROOM_ID.to_string(), identity.room_claim.clone()));
        }
        let upstream_request = UpstreamRequest {
            method: request.method,
            path: request.path,
            query: request.query,
            headers,
            body: request.body,
            request_id: request.request_id,
        };

        let call_started = Instant::now();
        let report = call_with_retries(
            self.upstream.as_ref(),
            &route.service_id,
            &upstream_request,
            route.timeout,
            route.retry_count,
            &self.retry,
        )
        .await;
        let latency = call_started.elapsed();

        let healthy = match &report.result {
            Ok(_) => true,
            Err(failure) => !failure.counts_against_breaker(),
        };
        match probe {
            Some(probe) => probe.complete(healthy, latency),
            None if route.circuit_breaker_enabled => {
                self.breakers.record_result(&route.service_id, healthy, latency)
            }
            None => self.metrics.record_upstream(&route.service_id, healthy, latency),
        }

        let outcome = if report.result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        self.metrics.record_request(&route.id, outcome, started.elapsed());

        match report.result {
            Ok(response) => {
                if let Some(key) = cache_key {
                    if let Err(e) = self
                        .cache
                        .set_value(&route.id, &key, &response, route.cache_ttl)
                        .await
                    {
                        tracing::warn!(route = %route.id, error = %e, "Cache write failed");
                    }
                }
                Ok(response)
            }
            Err(failure) => {
                tracing::warn!(
                    route = %route.id,
                    service = %route.service_id,
                    path = %path_and_query,
                    attempts = report.attempts,
                    failure = ?failure,
                    "Upstream call failed"
                );
                Err(into_gateway_error(&route, failure, report.attempts))
            }
        }
    }

    async fn authenticate(
        &self,
        route: &ServiceRoute,
        credential: Option<&str>,
    ) -> Result<Option<Identity>, GatewayError> {
        let Some(credential) = credential else {
            if route.auth_required {
                self.metrics.record_rejected("unauthorized");
                return Err(GatewayError::Unauthorized);
            }
            return Ok(None);
        };

        match self.identity.validate(credential).await {
            Ok(identity) => Ok(Some(identity)),
            Err(AuthError::Unavailable(reason)) if route.auth_required => {
                self.metrics.record_rejected("identity_unavailable");
                tracing::error!(route = %route.id, reason = %reason, "Identity validation unavailable");
                Err(GatewayError::ServiceUnavailable {
                    service_id: "identity".to_string(),
                })
            }
            Err(e) if route.auth_required => {
                self.metrics.record_rejected("unauthorized");
                tracing::debug!(route = %route.id, error = %e, "Rejected credential");
                Err(GatewayError::Unauthorized)
            }
            // Public routes treat a bad credential as anonymous.
            Err(_) => Ok(None),
        }
    }

    /// Route-bound rule first, then the longest matching endpoint rule.
    fn rule_for(&self, route: &ServiceRoute, path: &str) -> Option<Arc<RateLimitRule>> {
        match &route.rate_limit {
            Some(rule) => Some(Arc::new(rule.clone())),
            None => self.rules.resolve(path),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<MetricsAggregator> {
        self.metrics.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn breaker_state(&self, service_id: &str) -> CircuitState {
        self.breakers.snapshot(service_id).state
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn routes(&self) -> Vec<Arc<ServiceRoute>> {
        self.routes.routes()
    }

    pub fn rate_limit_rules(&self) -> Vec<Arc<RateLimitRule>> {
        self.rules.rules()
    }

    pub fn identity_validator(&self) -> Arc<dyn IdentityValidator> {
        self.identity.clone()
    }
}

/// Cache key for a cacheable request, `None` otherwise.
///
/// Only GET and HEAD on routes with a TTL are cached. Authenticated routes
/// key by identity so one caller never sees another's response.
fn cache_key(route: &ServiceRoute, request: &GatewayRequest, identity: Option<&Identity>) -> Option<String> {
    if route.cache_ttl.is_zero() {
        return None;
    }
    if request.method != Method::GET && request.method != Method::HEAD {
        return None;
    }
    let target = request.path_and_query();
    match (route.auth_required, identity) {
        (true, Some(identity)) => Some(format!("{}|{} {}", identity.identity_id, request.method, target)),
        (true, None) => None,
        (false, _) => Some(format!("{} {}", request.method, target)),
    }
}

fn into_gateway_error(route: &ServiceRoute, failure: CallFailure, attempts: u32) -> GatewayError {
    match failure {
        CallFailure::Timeout => GatewayError::UpstreamTimeout {
            service_id: route.service_id.clone(),
            attempts,
        },
        CallFailure::Transient { status, message } => GatewayError::UpstreamError {
            service_id: route.service_id.clone(),
            status,
            message,
            body: Vec::new(),
        },
        CallFailure::Client { status, body } => GatewayError::UpstreamError {
            service_id: route.service_id.clone(),
            status: Some(status),
            message: format!("upstream returned {status}"),
            body,
        },
    }
}
