//! Fingerprint-keyed advice cache.

use crate::collections::{GetOutcome, TtlLruCache};
use crate::fingerprint::Fingerprint;
use crate::logging::log_warn;
use crate::record::Advice;
use std::time::Duration;
use tokio::sync::Mutex;

/// Outcome of a cache lookup, distinguished from a hit/miss on the
/// underlying collection so the pipeline can emit the right metric name.
pub enum Lookup {
    Hit(Advice),
    Miss,
}

/// LRU cache of `fingerprint -> Advice`, TTL- and byte-budget-bounded.
///
/// Collapsing concurrent analyses of the same fingerprint onto one upstream
/// call is handled by the HTTP request cache, not here — this cache only
/// needs to be safe for concurrent reads/writes, which the
/// `tokio::sync::Mutex` wrapper gives it.
pub struct AdviceCache {
    inner: Mutex<TtlLruCache<Fingerprint, Advice>>,
    max_advice_size: usize,
}

impl AdviceCache {
    pub fn new(capacity: u32, ttl: Duration, max_bytes: usize, max_advice_size: usize) -> Self {
        Self {
            inner: Mutex::new(TtlLruCache::new(capacity as usize, ttl, max_bytes)),
            max_advice_size,
        }
    }

    pub async fn lookup(&self, fingerprint: Fingerprint) -> Lookup {
        let mut guard = self.inner.lock().await;
        match guard.get(&fingerprint) {
            GetOutcome::Hit(advice) => Lookup::Hit(advice),
            GetOutcome::Miss => Lookup::Miss,
        }
    }

    /// Store `advice` under `fingerprint`. Rejects (and logs) advice whose
    /// serialized size exceeds `MAX_ADVICE_SIZE` — oversize advice is never
    /// cached.
    pub async fn store(&self, fingerprint: Fingerprint, advice: Advice) -> bool {
        if advice.exceeds_size_limit(self.max_advice_size) {
            log_warn!(
                fingerprint = %fingerprint,
                serialized_bytes = advice.serialized_bytes,
                max_advice_size = self.max_advice_size,
                "advice exceeds MAX_ADVICE_SIZE, not caching"
            );
            return false;
        }

        let bytes = advice.serialized_bytes;
        let mut guard = self.inner.lock().await;
        guard.set(fingerprint, advice, bytes)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn total_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes()
    }

    pub async fn flush(&self) {
        self.inner.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Remediation;

    fn fp(n: u64) -> Fingerprint {
        Fingerprint(n)
    }

    #[tokio::test]
    async fn miss_then_hit_after_store() {
        let cache = AdviceCache::new(10, Duration::from_secs(3600), 1_000_000, 524_288);
        assert!(matches!(cache.lookup(fp(1)).await, Lookup::Miss));

        let advice = Advice::new("diag", Remediation::Single("fix it".into()), None);
        assert!(cache.store(fp(1), advice).await);
        assert!(matches!(cache.lookup(fp(1)).await, Lookup::Hit(_)));
    }

    #[tokio::test]
    async fn rejects_oversize_advice() {
        let cache = AdviceCache::new(10, Duration::from_secs(3600), 1_000_000, 10);
        let advice = Advice::new("x".repeat(1000), Remediation::Single("y".into()), None);
        assert!(!cache.store(fp(1), advice).await);
        assert!(matches!(cache.lookup(fp(1)).await, Lookup::Miss));
    }
}
