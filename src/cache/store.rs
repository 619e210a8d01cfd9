//! Key/value storage backends for the response cache.
//!
//! [`KvStore`] is the seam a shared backend plugs into for multi-instance
//! deployments. [`MemoryStore`] is the single-node implementation: sharded
//! `DashMap` entries, lazy TTL expiry and global LRU eviction at capacity.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;

use crate::cache::CacheError;
use crate::clock::SharedClock;

/// What a `set` did to the rest of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOutcome {
    /// `(namespace, key)` removed to make room, if any.
    pub evicted: Option<(String, String)>,
    /// True when an expired entry was dropped to make room instead.
    pub reclaimed_expired: bool,
}

/// Namespaced key/value storage with TTL.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Fetch a live value, refreshing its access time. Expired entries are
    /// removed and reported as absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Insert or overwrite a value. A zero `ttl` never expires.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<SetOutcome, CacheError>;

    /// Remove a value. Returns true if a live entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError>;

    /// Check for a live value without refreshing its access time.
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, CacheError>;

    /// Drop every entry in a namespace. Returns the number removed.
    async fn clear_namespace(&self, namespace: &str) -> Result<usize, CacheError>;

    /// Remove all expired entries. Returns the number removed.
    async fn sweep_expired(&self) -> Result<usize, CacheError>;

    /// Number of stored entries (expired ones not yet reclaimed included).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    fn capacity(&self) -> usize;
}

type EntryKey = (String, String);

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    created_at: u64,
    expires_at: Option<u64>,
    last_access_at: AtomicU64,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if now > at)
    }
}

/// Eviction bookkeeping shared by every namespace.
#[derive(Debug)]
struct EvictionIndex {
    /// Recency order; the front is the least recently used key.
    recency: LruCache<EntryKey, ()>,
    /// Keys with a TTL, ordered by expiry time.
    expiries: BTreeSet<(u64, EntryKey)>,
}

impl EvictionIndex {
    fn track(&mut self, key: &EntryKey, expires_at: Option<u64>) {
        self.recency.put(key.clone(), ());
        if let Some(at) = expires_at {
            self.expiries.insert((at, key.clone()));
        }
    }

    fn forget(&mut self, key: &EntryKey, expires_at: Option<u64>) {
        self.recency.pop(key);
        if let Some(at) = expires_at {
            self.expiries.remove(&(at, key.clone()));
        }
    }

    /// Take an expired key if there is one, else the least recently used.
    /// The flag is true for an expired key.
    fn pop_victim(&mut self, now: u64) -> Option<(EntryKey, bool)> {
        if self.expiries.first().is_some_and(|(at, _)| now > *at) {
            let (_, key) = self.expiries.pop_first()?;
            self.recency.pop(&key);
            return Some((key, true));
        }
        self.recency.pop_lru().map(|(key, ())| (key, false))
    }
}

/// In-process store with global LRU eviction.
///
/// Values live in a sharded `DashMap`; reads of different keys never
/// contend. Writes and recency updates go through one short-lived index
/// lock, taken before any shard lock.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<EntryKey, Entry>,
    index: Mutex<EvictionIndex>,
    capacity: usize,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            index: Mutex::new(EvictionIndex {
                recency: LruCache::unbounded(),
                expiries: BTreeSet::new(),
            }),
            capacity: capacity.max(1),
            clock,
        }
    }

    fn index(&self) -> Result<MutexGuard<'_, EvictionIndex>, CacheError> {
        self.index
            .lock()
            .map_err(|_| CacheError::Backend("eviction index lock poisoned".to_string()))
    }

    fn entry_key(namespace: &str, key: &str) -> EntryKey {
        (namespace.to_string(), key.to_string())
    }

    fn expires_at(now: u64, ttl: Duration) -> Option<u64> {
        if ttl.is_zero() {
            None
        } else {
            Some(now.saturating_add(ttl.as_millis() as u64))
        }
    }

    /// Remove `key` if it is still expired at `now`.
    fn remove_if_expired(&self, key: &EntryKey, now: u64) -> Result<bool, CacheError> {
        let mut index = self.index()?;
        match self.entries.remove_if(key, |_, entry| entry.is_expired(now)) {
            Some((key, entry)) => {
                index.forget(&key, entry.expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Access time bookkeeping for the entry at `(namespace, key)`, if present.
    pub fn last_access_at(&self, namespace: &str, key: &str) -> Option<u64> {
        self.entries
            .get(&Self::entry_key(namespace, key))
            .map(|e| e.last_access_at.load(Ordering::Relaxed))
    }

    /// Creation time of the entry at `(namespace, key)`, if present.
    pub fn created_at(&self, namespace: &str, key: &str) -> Option<u64> {
        self.entries
            .get(&Self::entry_key(namespace, key))
            .map(|e| e.created_at)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entry_key = Self::entry_key(namespace, key);
        let now = self.clock.now_millis();

        let live = match self.entries.get(&entry_key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => {
                entry.last_access_at.store(now, Ordering::Relaxed);
                Some(entry.value.clone())
            }
        };

        match live {
            Some(value) => {
                // A concurrent delete may have dropped the key; `get` is then a no-op.
                self.index()?.recency.get(&entry_key);
                Ok(Some(value))
            }
            None => {
                self.remove_if_expired(&entry_key, now)?;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<SetOutcome, CacheError> {
        let entry_key = Self::entry_key(namespace, key);
        let now = self.clock.now_millis();
        let expires_at = Self::expires_at(now, ttl);

        let mut index = self.index()?;

        if let Some(mut entry) = self.entries.get_mut(&entry_key) {
            index.forget(&entry_key, entry.expires_at);
            entry.value = value;
            entry.created_at = now;
            entry.expires_at = expires_at;
            entry.last_access_at.store(now, Ordering::Relaxed);
            index.track(&entry_key, expires_at);
            return Ok(SetOutcome::default());
        }

        let mut outcome = SetOutcome::default();
        while self.entries.len() >= self.capacity {
            let Some((victim, expired)) = index.pop_victim(now) else {
                break;
            };
            let Some((victim, entry)) = self.entries.remove(&victim) else {
                continue;
            };
            index.forget(&victim, entry.expires_at);
            if expired {
                outcome.reclaimed_expired = true;
            } else {
                outcome.evicted = Some(victim);
            }
        }

        index.track(&entry_key, expires_at);
        self.entries.insert(
            entry_key,
            Entry {
                value,
                created_at: now,
                expires_at,
                last_access_at: AtomicU64::new(now),
            },
        );
        Ok(outcome)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        let mut index = self.index()?;
        Ok(match self.entries.remove(&Self::entry_key(namespace, key)) {
            Some((key, entry)) => {
                index.forget(&key, entry.expires_at);
                !entry.is_expired(now)
            }
            None => false,
        })
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let entry_key = Self::entry_key(namespace, key);
        let now = self.clock.now_millis();
        let expired = match self.entries.get(&entry_key) {
            None => return Ok(false),
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            self.remove_if_expired(&entry_key, now)?;
        }
        Ok(!expired)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<usize, CacheError> {
        let mut index = self.index()?;
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if key.0 != namespace {
                return true;
            }
            index.forget(key, entry.expires_at);
            removed += 1;
            false
        });
        Ok(removed)
    }

    async fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now_millis();
        let mut index = self.index()?;
        let mut removed = 0;
        while index.expiries.first().is_some_and(|(at, _)| now > *at) {
            let Some((victim, _)) = index.pop_victim(now) else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(capacity: usize) -> (MemoryStore, std::sync::Arc<ManualClock>) {
        let clock = ManualClock::new(0);
        (MemoryStore::new(capacity, clock.clone()), clock)
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let (store, _) = store(8);
        store.set("a", "k", b"one".to_vec(), Duration::ZERO).await.unwrap();
        store.set("b", "k", b"two".to_vec(), Duration::ZERO).await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("b", "k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_removed_on_access() {
        let (store, clock) = store(8);
        store.set("ns", "k", vec![1], Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_millis(1000));
        assert!(store.exists("ns", "k").await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(!store.exists("ns", "k").await.unwrap());
        assert_eq!(store.len(), 0);
        assert_eq!(store.get("ns", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_at_capacity_does_not_evict() {
        let (store, _) = store(2);
        store.set("ns", "a", vec![1], Duration::ZERO).await.unwrap();
        store.set("ns", "b", vec![2], Duration::ZERO).await.unwrap();

        let outcome = store.set("ns", "a", vec![3], Duration::ZERO).await.unwrap();
        assert_eq!(outcome, SetOutcome::default());
        assert_eq!(store.get("ns", "a").await.unwrap(), Some(vec![3]));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn lru_is_global_across_namespaces() {
        let (store, clock) = store(3);
        store.set("x", "1", vec![1], Duration::ZERO).await.unwrap();
        clock.advance(Duration::from_millis(5));
        store.set("y", "2", vec![2], Duration::ZERO).await.unwrap();
        clock.advance(Duration::from_millis(5));
        store.set("z", "3", vec![3], Duration::ZERO).await.unwrap();

        // Touch the oldest so "y/2" becomes least recently used.
        store.get("x", "1").await.unwrap();
        assert_eq!(store.last_access_at("x", "1"), Some(10));
        assert_eq!(store.created_at("x", "1"), Some(0));

        let outcome = store.set("w", "4", vec![4], Duration::ZERO).await.unwrap();
        assert_eq!(outcome.evicted, Some(("y".to_string(), "2".to_string())));
        assert!(!store.exists("y", "2").await.unwrap());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn expired_entry_is_reclaimed_before_lru() {
        let (store, clock) = store(2);
        store.set("ns", "old", vec![1], Duration::ZERO).await.unwrap();
        store.set("ns", "short", vec![2], Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let outcome = store.set("ns", "new", vec![3], Duration::ZERO).await.unwrap();
        assert!(outcome.reclaimed_expired);
        assert_eq!(outcome.evicted, None);
        assert!(store.exists("ns", "old").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_and_clear_namespace() {
        let (store, clock) = store(8);
        store.set("a", "1", vec![1], Duration::from_secs(1)).await.unwrap();
        store.set("a", "2", vec![2], Duration::ZERO).await.unwrap();
        store.set("b", "1", vec![3], Duration::ZERO).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.clear_namespace("a").await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn evicted_and_overwritten_keys_leave_no_stale_expiry() {
        let (store, clock) = store(2);
        store.set("ns", "a", vec![1], Duration::from_secs(10)).await.unwrap();
        store.set("ns", "b", vec![2], Duration::ZERO).await.unwrap();

        // "a" is least recently used and not yet expired.
        let outcome = store.set("ns", "c", vec![3], Duration::ZERO).await.unwrap();
        assert_eq!(outcome.evicted, Some(("ns".to_string(), "a".to_string())));
        assert!(!outcome.reclaimed_expired);

        // Overwriting replaces the old TTL.
        store.set("ns", "b", vec![4], Duration::from_secs(1)).await.unwrap();
        store.set("ns", "b", vec![5], Duration::ZERO).await.unwrap();

        clock.advance(Duration::from_secs(20));
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        assert_eq!(store.get("ns", "b").await.unwrap(), Some(vec![5]));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn eviction_follows_access_order() {
        let (store, _) = store(4);
        for key in ["a", "b", "c", "d"] {
            store.set("ns", key, vec![0], Duration::ZERO).await.unwrap();
        }
        for key in ["a", "c", "b"] {
            store.get("ns", key).await.unwrap();
        }

        let mut evicted = Vec::new();
        for key in ["e", "f", "g"] {
            let outcome = store.set("ns", key, vec![0], Duration::ZERO).await.unwrap();
            evicted.push(outcome.evicted.map(|(_, k)| k));
        }
        assert_eq!(
            evicted,
            vec![Some("d".to_string()), Some("a".to_string()), Some("c".to_string())]
        );
    }
}
