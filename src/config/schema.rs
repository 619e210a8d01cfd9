//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, request limits).
    pub listener: ListenerConfig,

    /// Route table mapping path prefixes to upstream services.
    pub routes: Vec<RouteConfig>,

    /// Rate limit rule table, matched by endpoint prefix.
    pub rate_limits: Vec<RateLimitRule>,

    /// Upstream service addresses.
    pub upstreams: Vec<UpstreamConfig>,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Circuit breaker defaults and per-service overrides.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry backoff configuration.
    pub retries: RetryConfig,

    /// Static credential table used by the identity validator.
    pub auth: AuthConfig,

    /// Real-time connection settings.
    pub realtime: RealtimeConfig,

    /// Background maintenance (cache sweep, counter purge).
    pub maintenance: MaintenanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Outer deadline for a whole request, retries included.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Take the client IP from the first `X-Forwarded-For` entry. Only
    /// enable behind a proxy that sets the header.
    pub trust_forwarded_for: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
            trust_forwarded_for: false,
        }
    }
}

/// Route configuration mapping a path prefix to an upstream service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier, also the cache namespace.
    pub id: String,

    /// Path prefix to match (longest prefix wins).
    pub path_prefix: String,

    /// Upstream service this route forwards to.
    pub service_id: String,

    /// Inline rate limit bound to this route.
    #[serde(default)]
    pub rate_limit: Option<RouteRateLimit>,

    /// Response cache TTL in seconds (0 disables caching).
    #[serde(default)]
    pub cache_ttl_secs: u64,

    /// Per-attempt upstream timeout in milliseconds.
    #[serde(default = "default_route_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts on transient upstream failures.
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,

    #[serde(default)]
    pub auth_required: bool,
}

fn default_route_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

/// Rate limit declared inline on a route; the endpoint is the route prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRateLimit {
    pub max_requests: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub scope: RateLimitScope,
}

/// Who a rate-limit counter is tracked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    PerUser,
    #[default]
    PerIp,
    Global,
}

/// A fixed-window admission rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Endpoint prefix the rule applies to.
    pub endpoint: String,

    /// Requests admitted per window. Must be > 0.
    pub max_requests: u32,

    /// Window length in seconds. Must be > 0.
    pub window_secs: u64,

    #[serde(default)]
    pub scope: RateLimitScope,
}

impl RateLimitRule {
    pub fn new(endpoint: impl Into<String>, max_requests: u32, window_secs: u64, scope: RateLimitScope) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_requests,
            window_secs,
            scope,
        }
    }

    pub fn window_millis(&self) -> u64 {
        self.window_secs.saturating_mul(1_000)
    }
}

/// Upstream service address.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub service_id: String,

    /// Base URL requests are forwarded to (e.g., "http://127.0.0.1:3000").
    pub base_url: String,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries across all namespaces.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Thresholds for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before admitting a probe.
    pub open_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 30,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Settings applied to every service without an override.
    #[serde(flatten)]
    pub defaults: BreakerSettings,

    /// Per-service overrides keyed by service id.
    pub services: HashMap<String, BreakerSettings>,
}

impl CircuitBreakerConfig {
    pub fn settings_for(&self, service_id: &str) -> BreakerSettings {
        self.services.get(service_id).copied().unwrap_or(self.defaults)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// A credential accepted by the static token validator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub token: String,
    pub identity_id: String,

    /// Room (family) the identity belongs to.
    pub room: String,

    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenConfig>,
}

/// Real-time connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,

    /// Path the WebSocket endpoint is mounted on.
    pub path: String,

    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,

    /// Per-identity inbound message limit.
    pub message_rate: RateLimitRule,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/ws".to_string(),
            outbound_queue: 64,
            message_rate: RateLimitRule::new("ws", 20, 10, RateLimitScope::PerUser),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between cache sweeps and rate counter purges (0 disables).
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Prometheus endpoint bind address.
    pub metrics_address: String,

    /// Number of response-time samples kept for percentiles.
    pub latency_samples: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            latency_samples: 1024,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
