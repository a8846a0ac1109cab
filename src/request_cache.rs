//! HTTP-level request deduplication and short-TTL response cache.
//!
//! Concurrent identical requests share one in-flight future via
//! `futures_util::future::Shared`, so a burst of callers analysing the same
//! error collapses onto a single upstream call instead of each one racing
//! off a separate request.

use crate::collections::{GetOutcome, TtlLruCache};
use crate::record::Advice;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Lightweight, cloneable error summary carried across a shared future —
/// `QerrorsError` itself isn't `Clone` (its `Upstream` source is a boxed
/// trait object), so concurrent dedup waiters see this instead and the
/// caller that actually issued the request is the only one that sees the
/// original `QerrorsError`.
#[derive(Debug, Clone)]
pub struct SharedAnalysisError(pub String);

impl std::fmt::Display for SharedAnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

type InFlightFuture = Shared<BoxFuture<'static, Result<Advice, SharedAnalysisError>>>;

/// Keyed by the caller-supplied request key (the error fingerprint, not the
/// serialised request body — two requests for the same logical error carry
/// different request ids and context, but must still collapse onto one
/// upstream call).
pub struct RequestCache {
    in_flight: StdMutex<HashMap<u64, InFlightFuture>>,
    completed: AsyncMutex<TtlLruCache<u64, Advice>>,
}

impl RequestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            in_flight: StdMutex::new(HashMap::new()),
            completed: AsyncMutex::new(TtlLruCache::new(10_000, ttl, 64 * 1024 * 1024)),
        }
    }

    /// A completed response still within the short TTL window.
    pub async fn completed_lookup(&self, key: u64) -> Option<Advice> {
        match self.completed.lock().await.get(&key) {
            GetOutcome::Hit(advice) => Some(advice),
            GetOutcome::Miss => None,
        }
    }

    pub async fn store_completed(&self, key: u64, advice: Advice) {
        let bytes = advice.serialized_bytes;
        self.completed.lock().await.set(key, advice, bytes);
    }

    /// Run `make_future` only if no identical request is currently
    /// in-flight for `key`; concurrent callers share its result, so at most
    /// one analysis is ever in flight for a given fingerprint at a time.
    pub async fn dedup<F>(&self, key: u64, make_future: F) -> Result<Advice, SharedAnalysisError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Advice, SharedAnalysisError>>,
    {
        let shared = {
            // Holding the std Mutex only across `entry`/`or_insert_with`
            // (never across an await) keeps this atomic: the first caller
            // to observe a missing key is the only one that builds and
            // polls the request future.
            let mut guard = self.in_flight.lock().unwrap();
            guard
                .entry(key)
                .or_insert_with(|| make_future().shared())
                .clone()
        };

        // Removes the in-flight entry on the way out whether `shared`
        // resolves normally or this call is cancelled (a queue-item
        // timeout drops the awaiting future without ever reaching a
        // return statement) - otherwise a timed-out dedup leaks its
        // entry in `in_flight` forever, since that map has no TTL/LRU
        // eviction of its own.
        let _cleanup = InFlightCleanup { cache: &self.in_flight, key };
        shared.await
    }
}

struct InFlightCleanup<'a> {
    cache: &'a StdMutex<HashMap<u64, InFlightFuture>>,
    key: u64,
}

impl Drop for InFlightCleanup<'_> {
    fn drop(&mut self) {
        self.cache.lock().unwrap().remove(&self.key);
    }
}

#[cfg(test)]
impl RequestCache {
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Remediation;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_dedup_issues_exactly_one_request() {
        let cache = Arc::new(RequestCache::new(Duration::from_secs(60)));
        let call_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let call_count = call_count.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .dedup(42, move || {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        Box::pin(async {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(Advice::new("diag", Remediation::Single("fix".into()), None))
                        })
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_dedup_still_clears_the_in_flight_entry() {
        let cache = Arc::new(RequestCache::new(Duration::from_secs(60)));

        let cache_for_timeout = cache.clone();
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            cache_for_timeout.dedup(7, || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Advice::new("diag", Remediation::Single("fix".into()), None))
                })
            }),
        )
        .await;

        assert!(outcome.is_err(), "dedup should have been cancelled by the timeout");
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn completed_cache_hits_within_ttl() {
        let cache = RequestCache::new(Duration::from_secs(60));
        assert!(cache.completed_lookup(1).await.is_none());
        cache
            .store_completed(1, Advice::new("d", Remediation::Single("r".into()), None))
            .await;
        assert!(cache.completed_lookup(1).await.is_some());
    }
}
