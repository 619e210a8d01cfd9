//! Fixed-window rate limiting.
//!
//! Each scope key owns a counter `(window_start, count)`. A call inside the
//! window increments the counter until `max_requests`, after which calls are
//! denied without incrementing. The counter resets once the window has fully
//! elapsed, so a caller can get up to `2 × max_requests` through across a
//! window boundary. That burst is an accepted property of the fixed window.
//!
//! Counters live in a `DashMap`; the entry guard holds the key's shard lock
//! for the whole read-modify-write, so concurrent callers never lose updates.

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::config::{RateLimitRule, RateLimitScope};

/// Per-key window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCounter {
    pub window_start: u64,
    pub count: u32,
    window_ms: u64,
}

impl RateLimitCounter {
    fn window_elapsed(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start) >= self.window_ms
    }

    fn reset_at(&self) -> u64 {
        self.window_start.saturating_add(self.window_ms)
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32, reset_at: u64 },
    Denied { retry_after: Duration, reset_at: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Counter key for one identity under `endpoint`, whatever the rule's scope.
pub fn identity_key(endpoint: &str, identity_id: &str) -> String {
    format!("{endpoint}|user:{identity_id}")
}

/// Build the counter key for a caller under `rule`.
///
/// A per-user rule applied to an anonymous caller falls back to the IP.
pub fn scope_key(rule: &RateLimitRule, identity: Option<&str>, ip: Option<IpAddr>) -> String {
    let ip = ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
    match (rule.scope, identity) {
        (RateLimitScope::PerUser, Some(id)) => identity_key(&rule.endpoint, id),
        (RateLimitScope::PerUser, None) | (RateLimitScope::PerIp, _) => {
            format!("{}|ip:{}", rule.endpoint, ip)
        }
        (RateLimitScope::Global, _) => format!("{}|global", rule.endpoint),
    }
}

/// Windowed admission counters keyed by scope.
#[derive(Debug)]
pub struct RateLimiter {
    counters: DashMap<String, RateLimitCounter>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Admit or deny one call for `scope_key`.
    pub fn allow(&self, scope_key: &str, rule: &RateLimitRule) -> bool {
        self.check(scope_key, rule).is_allowed()
    }

    /// Admit or deny one call, with the detail needed to answer the caller.
    pub fn check(&self, scope_key: &str, rule: &RateLimitRule) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let window_ms = rule.window_millis();

        let mut counter = self
            .counters
            .entry(scope_key.to_string())
            .or_insert_with(|| RateLimitCounter {
                window_start: now,
                count: 0,
                window_ms,
            });

        counter.window_ms = window_ms;
        if counter.window_elapsed(now) {
            counter.window_start = now;
            counter.count = 0;
        }

        let reset_at = counter.reset_at();
        if counter.count >= rule.max_requests {
            let wait_ms = reset_at.saturating_sub(now);
            let secs = wait_ms.div_ceil(1_000).clamp(1, rule.window_secs.max(1));
            return RateLimitDecision::Denied {
                retry_after: Duration::from_secs(secs),
                reset_at,
            };
        }

        counter.count += 1;
        RateLimitDecision::Allowed {
            remaining: rule.max_requests - counter.count,
            reset_at,
        }
    }

    /// Calls still admissible in the current window.
    pub fn remaining(&self, scope_key: &str, rule: &RateLimitRule) -> u32 {
        let now = self.clock.now_millis();
        match self.counters.get(scope_key) {
            Some(counter) if !counter.window_elapsed(now) => {
                rule.max_requests.saturating_sub(counter.count)
            }
            _ => rule.max_requests,
        }
    }

    /// When the current window for `scope_key` ends, if one is open.
    pub fn reset_at(&self, scope_key: &str, _rule: &RateLimitRule) -> Option<u64> {
        let now = self.clock.now_millis();
        self.counters
            .get(scope_key)
            .filter(|counter| !counter.window_elapsed(now))
            .map(|counter| counter.reset_at())
    }

    /// Drop counters whose window has elapsed. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.window_elapsed(now));
        before.saturating_sub(self.counters.len())
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = ManualClock::new(1_000_000);
        (RateLimiter::new(clock.clone()), clock)
    }

    #[test]
    fn admits_exactly_max_requests_per_window() {
        let (limiter, clock) = limiter();
        let rule = RateLimitRule::new("/x", 3, 60, RateLimitScope::PerIp);

        for _ in 0..3 {
            assert!(limiter.allow("k", &rule));
        }
        match limiter.check("k", &rule) {
            RateLimitDecision::Denied { retry_after, .. } => {
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after >= Duration::from_secs(1));
            }
            other => panic!("expected denial, got {other:?}"),
        }
        // Denials do not consume the window.
        assert_eq!(limiter.remaining("k", &rule), 0);

        clock.advance(Duration::from_secs(60));
        assert!(limiter.allow("k", &rule));
        assert_eq!(limiter.remaining("k", &rule), 2);
    }

    #[test]
    fn retry_after_shrinks_as_the_window_runs() {
        let (limiter, clock) = limiter();
        let rule = RateLimitRule::new("/x", 1, 10, RateLimitScope::Global);
        assert!(limiter.allow("g", &rule));

        clock.advance(Duration::from_millis(7_500));
        match limiter.check("g", &rule) {
            RateLimitDecision::Denied { retry_after, reset_at } => {
                assert_eq!(retry_after, Duration::from_secs(3));
                assert_eq!(reset_at, 1_010_000);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn independent_keys_do_not_interact() {
        let (limiter, _) = limiter();
        let rule = RateLimitRule::new("/x", 2, 60, RateLimitScope::PerIp);

        assert!(limiter.allow("a", &rule));
        assert!(limiter.allow("a", &rule));
        assert!(!limiter.allow("a", &rule));

        assert_eq!(limiter.remaining("b", &rule), 2);
        assert!(limiter.allow("b", &rule));
        assert!(limiter.allow("b", &rule));
    }

    #[test]
    fn reset_at_reports_window_end() {
        let (limiter, clock) = limiter();
        let rule = RateLimitRule::new("/x", 5, 30, RateLimitScope::PerIp);
        assert_eq!(limiter.reset_at("k", &rule), None);

        limiter.allow("k", &rule);
        assert_eq!(limiter.reset_at("k", &rule), Some(1_030_000));

        clock.advance(Duration::from_secs(31));
        assert_eq!(limiter.reset_at("k", &rule), None);
    }

    #[test]
    fn purge_drops_only_elapsed_windows() {
        let (limiter, clock) = limiter();
        let short = RateLimitRule::new("/a", 1, 1, RateLimitScope::PerIp);
        let long = RateLimitRule::new("/b", 1, 60, RateLimitScope::PerIp);
        limiter.allow("short", &short);
        limiter.allow("long", &long);

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.counter_count(), 1);
    }

    #[test]
    fn scope_keys() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let per_user = RateLimitRule::new("/api", 1, 1, RateLimitScope::PerUser);
        let per_ip = RateLimitRule::new("/api", 1, 1, RateLimitScope::PerIp);
        let global = RateLimitRule::new("/api", 1, 1, RateLimitScope::Global);

        assert_eq!(scope_key(&per_user, Some("mom"), Some(ip)), "/api|user:mom");
        assert_eq!(scope_key(&per_user, None, Some(ip)), "/api|ip:10.0.0.1");
        assert_eq!(scope_key(&per_ip, Some("mom"), Some(ip)), "/api|ip:10.0.0.1");
        assert_eq!(scope_key(&global, Some("mom"), Some(ip)), "/api|global");
    }

    #[test]
    fn concurrent_callers_never_exceed_the_limit() {
        let clock = ManualClock::new(0);
        let limiter = Arc::new(RateLimiter::new(clock));
        let rule = RateLimitRule::new("/x", 100, 60, RateLimitScope::Global);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let rule = rule.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.allow("hot", &rule)).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
