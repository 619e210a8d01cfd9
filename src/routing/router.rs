//! Route and rate-limit rule lookup.
//!
//! # Design Decisions
//! - Tables are published through `ArcSwap`: lookups are lock-free and never
//!   observe a half-registered route
//! - Entries are kept sorted by prefix length, so the first match is the
//!   longest (most specific) one
//! - Writers are serialized by a mutex and rebuild the table copy-on-write

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;

use crate::config::{RateLimitRule, RouteConfig};
use crate::routing::matcher::PathPrefixMatcher;

/// A route as the gateway uses it.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRoute {
    pub id: String,
    pub path_prefix: String,
    pub service_id: String,
    pub rate_limit: Option<RateLimitRule>,
    /// Zero disables response caching.
    pub cache_ttl: Duration,
    pub timeout: Duration,
    pub retry_count: u32,
    pub circuit_breaker_enabled: bool,
    pub auth_required: bool,
}

impl ServiceRoute {
    pub fn new(id: &str, path_prefix: &str, service_id: &str) -> Self {
        Self {
            id: id.to_string(),
            path_prefix: path_prefix.to_string(),
            service_id: service_id.to_string(),
            rate_limit: None,
            cache_ttl: Duration::ZERO,
            timeout: Duration::from_secs(5),
            retry_count: 0,
            circuit_breaker_enabled: true,
            auth_required: false,
        }
    }
}

impl From<&RouteConfig> for ServiceRoute {
    fn from(config: &RouteConfig) -> Self {
        Self {
            id: config.id.clone(),
            path_prefix: config.path_prefix.clone(),
            service_id: config.service_id.clone(),
            rate_limit: config.rate_limit.as_ref().map(|limit| {
                RateLimitRule::new(
                    &config.path_prefix,
                    limit.max_requests,
                    limit.window_secs,
                    limit.scope,
                )
            }),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            timeout: Duration::from_millis(config.timeout_ms),
            retry_count: config.retry_count,
            circuit_breaker_enabled: config.circuit_breaker_enabled,
            auth_required: config.auth_required,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route id `{0}` is already registered")]
    DuplicateId(String),

    #[error("path prefix `{0}` is already registered")]
    DuplicatePrefix(String),

    #[error("path prefix `{0}` must start with '/'")]
    InvalidPrefix(String),
}

#[derive(Debug)]
struct CompiledRoute {
    matcher: PathPrefixMatcher,
    route: Arc<ServiceRoute>,
}

/// Longest-prefix route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<CompiledRoute>>>,
    writer: Mutex<()>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, route: ServiceRoute) -> Result<(), RouteError> {
        if !route.path_prefix.starts_with('/') {
            return Err(RouteError::InvalidPrefix(route.path_prefix));
        }
        let matcher = PathPrefixMatcher::new(route.path_prefix.as_str());

        let _writer = self.writer.lock().expect("route table writer mutex poisoned");
        let current = self.routes.load();
        for existing in current.iter() {
            if existing.route.id == route.id {
                return Err(RouteError::DuplicateId(route.id));
            }
            if existing.matcher == matcher {
                return Err(RouteError::DuplicatePrefix(route.path_prefix));
            }
        }

        tracing::debug!(route = %route.id, prefix = %matcher.prefix(), service = %route.service_id, "Registered route");

        let mut next: Vec<Arc<CompiledRoute>> = current.iter().cloned().collect();
        next.push(Arc::new(CompiledRoute {
            matcher,
            route: Arc::new(route),
        }));
        next.sort_by(|a, b| b.matcher.specificity().cmp(&a.matcher.specificity()));
        self.routes.store(Arc::new(next));
        Ok(())
    }

    /// Most specific route whose prefix matches `path`.
    pub fn resolve(&self, path: &str) -> Option<Arc<ServiceRoute>> {
        self.routes
            .load()
            .iter()
            .find(|compiled| compiled.matcher.matches(path))
            .map(|compiled| compiled.route.clone())
    }

    pub fn routes(&self) -> Vec<Arc<ServiceRoute>> {
        self.routes.load().iter().map(|c| c.route.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rate limit rules matched by endpoint prefix.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: ArcSwap<Vec<(PathPrefixMatcher, Arc<RateLimitRule>)>>,
    writer: Mutex<()>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. A rule for an endpoint that already has one replaces it.
    pub fn register(&self, rule: RateLimitRule) {
        let matcher = PathPrefixMatcher::new(rule.endpoint.as_str());
        let _writer = self.writer.lock().expect("rule table writer mutex poisoned");

        let mut next: Vec<_> = self
            .rules
            .load()
            .iter()
            .filter(|(existing, _)| *existing != matcher)
            .cloned()
            .collect();
        next.push((matcher, Arc::new(rule)));
        next.sort_by(|a, b| b.0.specificity().cmp(&a.0.specificity()));
        self.rules.store(Arc::new(next));
    }

    /// Most specific rule covering `path`.
    pub fn resolve(&self, path: &str) -> Option<Arc<RateLimitRule>> {
        self.rules
            .load()
            .iter()
            .find(|(matcher, _)| matcher.matches(path))
            .map(|(_, rule)| rule.clone())
    }

    pub fn rules(&self) -> Vec<Arc<RateLimitRule>> {
        self.rules.load().iter().map(|(_, rule)| rule.clone()).collect()
    }
}
