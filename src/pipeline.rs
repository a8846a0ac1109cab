//! Composes fingerprint lookup, advice cache, and the HTTP client into one
//! concurrency-limited `analyse` operation.

use crate::advice::{AdviceCache, Lookup};
use crate::error::QerrorsError;
use crate::http_client::HttpClient;
use crate::metrics::Metrics;
use crate::record::{Advice, ErrorRecord};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Analysis pipeline: fingerprint → cache lookup → HTTP client → parse →
/// cache store, gated by a semaphore of width `CONCURRENCY_LIMIT`. Arrivals
/// beyond that queue upstream of this component, not here.
pub struct AnalysisPipeline {
    advice_cache: Arc<AdviceCache>,
    http_client: Arc<HttpClient>,
    metrics: Arc<Metrics>,
    concurrency: Arc<Semaphore>,
}

impl AnalysisPipeline {
    pub fn new(
        advice_cache: Arc<AdviceCache>,
        http_client: Arc<HttpClient>,
        metrics: Arc<Metrics>,
        concurrency_limit: u32,
    ) -> Self {
        Self {
            advice_cache,
            http_client,
            metrics,
            concurrency: Arc::new(Semaphore::new(concurrency_limit.max(1) as usize)),
        }
    }

    /// Run one analysis to completion. Always returns `Some(Advice)` unless
    /// the operation timed out or was cancelled, in which case the caller
    /// gets nothing cached and nothing to show.
    pub async fn analyse(&self, record: &ErrorRecord) -> Option<Advice> {
        let _permit = self.concurrency.acquire().await.ok()?;
        let started = Instant::now();

        let fingerprint = record.fingerprint;
        if let Lookup::Hit(advice) = self.advice_cache.lookup(fingerprint).await {
            self.metrics.record_cache_hit();
            return Some(advice);
        }
        self.metrics.record_cache_miss();

        let result = self.http_client.analyse(record).await;
        let outcome = self.handle_result(fingerprint, result).await;

        self.metrics
            .record_analysis_duration_ms(started.elapsed().as_secs_f64() * 1000.0);
        if let Some(advice) = &outcome {
            self.metrics
                .record_http_request_duration_ms(started.elapsed().as_secs_f64() * 1000.0);
            let _ = advice.serialized_bytes;
        }
        outcome
    }

    async fn handle_result(
        &self,
        fingerprint: crate::fingerprint::Fingerprint,
        result: Result<Advice, QerrorsError>,
    ) -> Option<Advice> {
        match result {
            Ok(advice) => {
                self.advice_cache.store(fingerprint, advice.clone()).await;
                self.metrics.set_cache_stats(
                    self.advice_cache.len().await as u64,
                    self.advice_cache.total_bytes().await as u64,
                );
                Some(advice)
            }
            Err(QerrorsError::Timeout { .. }) | Err(QerrorsError::Cancelled) => None,
            Err(_other) => Some(Advice::fallback_stub()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::severity::Severity;
    use std::time::Duration;

    fn advice_cache() -> Arc<AdviceCache> {
        Arc::new(AdviceCache::new(10, Duration::from_secs(3600), 1_000_000, 524_288))
    }

    fn record() -> ErrorRecord {
        ErrorRecord::new("DBError", "conn refused", vec![], Severity::High, None, None)
    }

    #[tokio::test]
    async fn cache_hit_skips_http_client_entirely() {
        let cache = advice_cache();
        let rec = record();
        let advice = Advice::new("DB unreachable", crate::record::Remediation::Single("check pool".into()), None);
        cache.store(rec.fingerprint, advice.clone()).await;

        let config = Arc::new(Config::default());
        let metrics = Arc::new(Metrics::new());
        let http_client = Arc::new(HttpClient::new(config, metrics.clone()));
        let pipeline = AnalysisPipeline::new(cache, http_client, metrics.clone(), 5);

        let result = pipeline.analyse(&rec).await;
        assert_eq!(result.unwrap().diagnosis, "DB unreachable");
        assert_eq!(metrics.snapshot(crate::circuit_breaker::CircuitState::Closed).counters.advice_cache_hit, 1);
    }
}
