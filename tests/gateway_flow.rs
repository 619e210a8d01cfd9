//! Pipeline scenarios driven by a manual clock and an in-process upstream.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use family_gateway::clock::ManualClock;
use family_gateway::config::{
    BreakerSettings, GatewayConfig, RateLimitRule, RateLimitScope, RouteConfig, RouteRateLimit,
};
use family_gateway::resilience::CircuitState;
use family_gateway::security::StaticTokenValidator;
use family_gateway::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};
use family_gateway::{GatewayError, GatewayRequest, Services};

/// Answers every call with the current `status`.
struct Backend {
    status: AtomicU16,
    calls: AtomicU32,
}

impl Backend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU16::new(200),
            calls: AtomicU32::new(0),
        })
    }

    fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for Backend {
    async fn invoke(&self, _service_id: &str, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.status.load(Ordering::SeqCst) {
            status @ 500.. => Err(UpstreamError::Transient {
                status: Some(status),
                message: "backend failure".to_string(),
            }),
            status @ 400..=499 => Err(UpstreamError::Client {
                status,
                body: Vec::new(),
            }),
            _ => Ok(UpstreamResponse::ok(request.path.clone().into_bytes())),
        }
    }
}

fn route(id: &str, prefix: &str) -> RouteConfig {
    RouteConfig {
        id: id.to_string(),
        path_prefix: prefix.to_string(),
        service_id: id.to_string(),
        rate_limit: None,
        cache_ttl_secs: 0,
        timeout_ms: 1_000,
        retry_count: 0,
        circuit_breaker_enabled: true,
        auth_required: false,
    }
}

fn services(config: &GatewayConfig) -> (Services, Arc<Backend>, Arc<ManualClock>) {
    let clock = ManualClock::new(1_700_000_000_000);
    let backend = Backend::new();
    let identity = StaticTokenValidator::new()
        .with_token("mom-token", "mom", "smiths")
        .with_token("dad-token", "dad", "smiths");
    let services = Services::with_collaborators(config, clock.clone(), backend.clone(), Arc::new(identity))
        .expect("services");
    (services, backend, clock)
}

fn ip(raw: &str) -> IpAddr {
    raw.parse().unwrap()
}

#[tokio::test]
async fn rate_window_reopens_after_it_elapses() {
    let mut config = GatewayConfig::default();
    config.routes.push(route("x", "/x"));
    config
        .rate_limits
        .push(RateLimitRule::new("/x", 3, 60, RateLimitScope::PerIp));
    let (services, backend, clock) = services(&config);
    let gateway = &services.gateway;

    for _ in 0..3 {
        gateway.handle_request(GatewayRequest::get("/x").with_ip(ip("10.0.0.1"))).await.unwrap();
    }
    let denied = gateway
        .handle_request(GatewayRequest::get("/x").with_ip(ip("10.0.0.1")))
        .await
        .unwrap_err();
    assert!(matches!(denied, GatewayError::RateLimited { .. }));
    assert_eq!(denied.status().as_u16(), 429);

    clock.advance(Duration::from_secs(60));
    gateway.handle_request(GatewayRequest::get("/x").with_ip(ip("10.0.0.1"))).await.unwrap();
    assert_eq!(backend.calls(), 4);
    assert_eq!(gateway.metrics().rate_limited, 1);
}

#[tokio::test]
async fn per_user_route_limits_count_each_identity() {
    let mut config = GatewayConfig::default();
    let mut family = route("family", "/api/v1/family");
    family.rate_limit = Some(RouteRateLimit {
        max_requests: 2,
        window_secs: 60,
        scope: RateLimitScope::PerUser,
    });
    config.routes.push(family);
    let (services, _, _) = services(&config);
    let gateway = &services.gateway;

    // Same IP, different identities.
    for token in ["mom-token", "mom-token", "dad-token", "dad-token"] {
        let request = GatewayRequest::get("/api/v1/family/members")
            .with_ip(ip("10.0.0.9"))
            .with_credential(token);
        gateway.handle_request(request).await.unwrap();
    }
    let third = GatewayRequest::get("/api/v1/family/members")
        .with_ip(ip("10.0.0.9"))
        .with_credential("mom-token");
    assert!(matches!(
        gateway.handle_request(third).await,
        Err(GatewayError::RateLimited { .. })
    ));
}

#[tokio::test]
async fn breaker_recovers_through_a_probe() {
    let mut config = GatewayConfig::default();
    config.routes.push(route("travel", "/api/v1/travel"));
    config.circuit_breaker.services.insert(
        "travel".to_string(),
        BreakerSettings {
            failure_threshold: 2,
            open_timeout_secs: 10,
        },
    );
    let (services, backend, clock) = services(&config);
    let gateway = &services.gateway;

    backend.set_status(500);
    for _ in 0..2 {
        let err = gateway.handle_request(GatewayRequest::get("/api/v1/travel/trips")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamError { .. }));
    }
    assert_eq!(gateway.breaker_state("travel"), CircuitState::Open);

    let err = gateway.handle_request(GatewayRequest::get("/api/v1/travel/trips")).await.unwrap_err();
    assert!(matches!(err, GatewayError::ServiceUnavailable { .. }));
    assert_eq!(backend.calls(), 2);

    backend.set_status(200);
    clock.advance(Duration::from_secs(10));
    let response = gateway.handle_request(GatewayRequest::get("/api/v1/travel/trips")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(gateway.breaker_state("travel"), CircuitState::Closed);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn client_errors_do_not_open_the_breaker() {
    let mut config = GatewayConfig::default();
    config.routes.push(route("memories", "/api/v1/memories"));
    config.circuit_breaker.defaults.failure_threshold = 1;
    let (services, backend, _) = services(&config);
    let gateway = &services.gateway;

    backend.set_status(404);
    for _ in 0..3 {
        let err = gateway.handle_request(GatewayRequest::get("/api/v1/memories/9")).await.unwrap_err();
        assert_eq!(err.status().as_u16(), 404);
    }
    assert_eq!(gateway.breaker_state("memories"), CircuitState::Closed);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn maintenance_reclaims_expired_cache_entries() {
    let mut config = GatewayConfig::default();
    let mut family = route("family", "/api/v1/family");
    family.cache_ttl_secs = 5;
    config.routes.push(family);
    let (services, backend, clock) = services(&config);
    let gateway = &services.gateway;

    for _ in 0..2 {
        gateway.handle_request(GatewayRequest::get("/api/v1/family/members")).await.unwrap();
    }
    assert_eq!(backend.calls(), 1);
    assert_eq!(gateway.cache_stats().entries, 1);

    clock.advance(Duration::from_secs(6));
    services.run_maintenance().await;
    assert_eq!(gateway.cache_stats().entries, 0);

    gateway.handle_request(GatewayRequest::get("/api/v1/family/members")).await.unwrap();
    assert_eq!(backend.calls(), 2);
}
