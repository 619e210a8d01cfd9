//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference configured upstreams)
//! - Validate value ranges (limits > 0, prefixes rooted at "/")
//! - Detect conflicting routes
//!
//! Returns all validation errors, not just the first.

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, RateLimitRule, RateLimitScope};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("route `{0}` is declared more than once")]
    DuplicateRouteId(String),

    #[error("path prefix `{0}` is used by more than one route")]
    DuplicatePrefix(String),

    #[error("route `{route}` has prefix `{prefix}` which does not start with '/'")]
    InvalidPrefix { route: String, prefix: String },

    #[error("route `{route}` forwards to unknown upstream `{service}`")]
    UnknownUpstream { route: String, service: String },

    #[error("route `{0}` has a zero timeout")]
    ZeroTimeout(String),

    #[error("rate limit `{0}` must have max_requests > 0 and window_secs > 0")]
    InvalidRateLimit(String),

    #[error("upstream `{service}` has an invalid base url: {reason}")]
    InvalidUpstreamUrl { service: String, reason: String },

    #[error("circuit breaker for `{0}` must have failure_threshold > 0")]
    InvalidBreaker(String),

    #[error("realtime.message_rate is counted per identity; scope must be `per_user`")]
    MessageRateScope,

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let upstreams: HashSet<&str> = config
        .upstreams
        .iter()
        .map(|u| u.service_id.as_str())
        .collect();

    for upstream in &config.upstreams {
        if let Err(e) = url::Url::parse(&upstream.base_url) {
            errors.push(ValidationError::InvalidUpstreamUrl {
                service: upstream.service_id.clone(),
                reason: e.to_string(),
            });
        }
    }

    let mut ids = HashSet::new();
    let mut prefixes = HashSet::new();
    for route in &config.routes {
        if !ids.insert(route.id.as_str()) {
            errors.push(ValidationError::DuplicateRouteId(route.id.clone()));
        }
        if !prefixes.insert(route.path_prefix.as_str()) {
            errors.push(ValidationError::DuplicatePrefix(route.path_prefix.clone()));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                route: route.id.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        if !upstreams.contains(route.service_id.as_str()) {
            errors.push(ValidationError::UnknownUpstream {
                route: route.id.clone(),
                service: route.service_id.clone(),
            });
        }
        if route.timeout_ms == 0 {
            errors.push(ValidationError::ZeroTimeout(route.id.clone()));
        }
        if let Some(limit) = &route.rate_limit {
            if limit.max_requests == 0 || limit.window_secs == 0 {
                errors.push(ValidationError::InvalidRateLimit(route.path_prefix.clone()));
            }
        }
    }

    for rule in &config.rate_limits {
        check_rule(rule, &mut errors);
    }
    check_rule(&config.realtime.message_rate, &mut errors);
    if config.realtime.message_rate.scope != RateLimitScope::PerUser {
        errors.push(ValidationError::MessageRateScope);
    }

    if config.circuit_breaker.defaults.failure_threshold == 0 {
        errors.push(ValidationError::InvalidBreaker("default".to_string()));
    }
    for (service, settings) in &config.circuit_breaker.services {
        if settings.failure_threshold == 0 {
            errors.push(ValidationError::InvalidBreaker(service.clone()));
        }
    }

    if config.cache.capacity == 0 {
        errors.push(ValidationError::ZeroCapacity("cache.capacity"));
    }
    if config.realtime.outbound_queue == 0 {
        errors.push(ValidationError::ZeroCapacity("realtime.outbound_queue"));
    }
    if config.observability.latency_samples == 0 {
        errors.push(ValidationError::ZeroCapacity("observability.latency_samples"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rule(rule: &RateLimitRule, errors: &mut Vec<ValidationError>) {
    if rule.max_requests == 0 || rule.window_secs == 0 {
        errors.push(ValidationError::InvalidRateLimit(rule.endpoint.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteConfig, UpstreamConfig};

    fn route(id: &str, prefix: &str, service: &str) -> RouteConfig {
        RouteConfig {
            id: id.to_string(),
            path_prefix: prefix.to_string(),
            service_id: service.to_string(),
            rate_limit: None,
            cache_ttl_secs: 0,
            timeout_ms: 1_000,
            retry_count: 0,
            circuit_breaker_enabled: true,
            auth_required: false,
        }
    }

    fn base() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.upstreams.push(UpstreamConfig {
            service_id: "family".to_string(),
            base_url: "http://127.0.0.1:3000".to_string(),
        });
        config
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = base();
        config.routes.push(route("a", "/api", "family"));
        config.routes.push(route("a", "/api", "budget"));
        config.routes.push(route("b", "nope", "family"));
        config
            .rate_limits
            .push(RateLimitRule::new("/x", 0, 60, RateLimitScope::PerIp));
        config.cache.capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateRouteId("a".into())));
        assert!(errors.contains(&ValidationError::DuplicatePrefix("/api".into())));
        assert!(errors.contains(&ValidationError::UnknownUpstream {
            route: "a".into(),
            service: "budget".into()
        }));
        assert!(errors.contains(&ValidationError::InvalidPrefix {
            route: "b".into(),
            prefix: "nope".into()
        }));
        assert!(errors.contains(&ValidationError::InvalidRateLimit("/x".into())));
        assert!(errors.contains(&ValidationError::ZeroCapacity("cache.capacity")));
    }

    #[test]
    fn rejects_bad_upstream_url() {
        let mut config = base();
        config.upstreams[0].base_url = "not a url".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidUpstreamUrl { .. }));
    }

    #[test]
    fn message_rate_must_be_per_user() {
        let mut config = base();
        config.realtime.message_rate.scope = RateLimitScope::Global;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MessageRateScope]);
    }
}
