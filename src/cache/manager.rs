//! Namespaced cache front end with hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheError, KvStore};
use crate::observability::MetricsAggregator;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub capacity: usize,
}

/// Cache front end shared by the gateway.
#[derive(Debug, Clone)]
pub struct CacheManager {
    store: Arc<dyn KvStore>,
    counters: Arc<Counters>,
    metrics: Option<Arc<MetricsAggregator>>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            counters: Arc::new(Counters::default()),
            metrics: None,
        }
    }

    /// Mirror cache events into the metrics aggregator.
    pub fn with_metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn event(&self, name: &'static str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_event(name);
        }
    }

    /// Look up a live value. Expired entries count as a miss.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self.store.get(namespace, key).await?;
        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.event("hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            self.event("miss");
        }
        Ok(value)
    }

    pub async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let outcome = self.store.set(namespace, key, value, ttl).await?;
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        if let Some((evicted_ns, evicted_key)) = outcome.evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            self.event("eviction");
            tracing::debug!(namespace = %evicted_ns, key = %evicted_key, "Evicted least recently used entry");
        }
        if outcome.reclaimed_expired {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let removed = self.store.delete(namespace, key).await?;
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    pub async fn exists(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        self.store.exists(namespace, key).await
    }

    /// Decode a value stored with [`CacheManager::set_value`].
    pub async fn get_value<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get(namespace, key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_value<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = bincode::serialize(value)?;
        self.set(namespace, key, bytes, ttl).await
    }

    pub async fn clear_namespace(&self, namespace: &str) -> Result<usize, CacheError> {
        let removed = self.store.clear_namespace(namespace).await?;
        self.counters.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    /// Reclaim expired entries ahead of their next access.
    pub async fn sweep_expired(&self) -> Result<usize, CacheError> {
        let removed = self.store.sweep_expired().await?;
        self.counters.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let accesses = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            hit_rate: if accesses == 0 { 0.0 } else { hits as f64 / accesses as f64 },
            entries: self.store.len(),
            capacity: self.store.capacity(),
        }
    }
}
