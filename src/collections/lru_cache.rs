//! LRU cache with per-entry TTL and a total byte budget.
//!
//! Built on `lru::LruCache` rather than a hand-rolled doubly linked list —
//! this crate already reaches for `lru` the way other bounded caches in the
//! ecosystem do, and wraps it with the TTL/byte-budget bookkeeping the
//! upstream crate doesn't provide natively.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    bytes: usize,
}

/// Outcome of a [`TtlLruCache::get`] call.
pub enum GetOutcome<V> {
    Hit(V),
    Miss,
}

/// LRU cache keyed by `K`, with per-entry TTL and a total byte budget.
///
/// Eviction order on insert: expired entries first, then least-recently-used,
/// until both the entry cap and the byte cap hold.
pub struct TtlLruCache<K: Hash + Eq, V: Clone> {
    inner: LruCache<K, Entry<V>>,
    ttl: Duration,
    max_bytes: usize,
    total_bytes: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: LruCache::new(capacity),
            ttl,
            max_bytes,
            total_bytes: 0,
        }
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.ttl > Duration::ZERO && entry.inserted_at.elapsed() >= self.ttl
    }

    /// Look up `key`. An expired entry is treated as a miss and removed.
    pub fn get(&mut self, key: &K) -> GetOutcome<V> {
        let expired = match self.inner.peek(key) {
            Some(entry) => self.is_expired(entry),
            None => return GetOutcome::Miss,
        };

        if expired {
            self.remove(key);
            return GetOutcome::Miss;
        }

        match self.inner.get(key) {
            Some(entry) => GetOutcome::Hit(entry.value.clone()),
            None => GetOutcome::Miss,
        }
    }

    pub fn has(&mut self, key: &K) -> bool {
        matches!(self.get(key), GetOutcome::Hit(_))
    }

    /// Insert `value` charging `bytes` against the byte budget. Evicts
    /// expired entries first, then LRU entries, until both caps hold.
    /// Returns `false` (and does not insert) if a single entry alone
    /// exceeds the byte budget.
    pub fn set(&mut self, key: K, value: V, bytes: usize) -> bool {
        if bytes > self.max_bytes {
            return false;
        }

        self.evict_expired();

        if let Some(old) = self.inner.pop(&key) {
            self.total_bytes = self.total_bytes.saturating_sub(old.bytes);
        }

        while self.total_bytes + bytes > self.max_bytes {
            if !self.evict_one_lru() {
                break;
            }
        }

        self.inner.put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                bytes,
            },
        );
        self.total_bytes += bytes;

        // lru's own capacity-based eviction may have silently dropped the
        // least-recently-used entry; reconcile our byte accounting.
        self.reconcile_bytes();
        true
    }

    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.remove(key)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.inner.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn evict_expired(&mut self) {
        if self.ttl == Duration::ZERO {
            return;
        }
        let expired_keys: Vec<K> = self
            .inner
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired_keys {
            self.remove(&key);
        }
    }

    fn evict_one_lru(&mut self) -> bool {
        match self.inner.pop_lru() {
            Some((_, entry)) => {
                self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
                true
            }
            None => false,
        }
    }

    fn reconcile_bytes(&mut self) {
        self.total_bytes = self.inner.iter().map(|(_, entry)| entry.bytes).sum();
    }
}
