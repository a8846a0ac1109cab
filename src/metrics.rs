//! In-process counters, gauges, and bounded histograms, plus the health
//! snapshot built from them.

use crate::circuit_breaker::CircuitState;
use crate::collections::CircularBuffer;
use crate::severity::Severity;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Default)]
struct SeverityCounters {
    low: AtomicU64,
    medium: AtomicU64,
    high: AtomicU64,
    critical: AtomicU64,
}

impl SeverityCounters {
    fn bump(&self, severity: Severity) {
        match severity {
            Severity::Low => self.low.fetch_add(1, Ordering::Relaxed),
            Severity::Medium => self.medium.fetch_add(1, Ordering::Relaxed),
            Severity::High => self.high.fetch_add(1, Ordering::Relaxed),
            Severity::Critical => self.critical.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> HashMap<&'static str, u64> {
        HashMap::from([
            ("low", self.low.load(Ordering::Relaxed)),
            ("medium", self.medium.load(Ordering::Relaxed)),
            ("high", self.high.load(Ordering::Relaxed)),
            ("critical", self.critical.load(Ordering::Relaxed)),
        ])
    }
}

/// Process-wide counters, gauges, and histograms. One instance lives
/// on [`crate::engine::QerrorsEngine`]; every component that observes an
/// event holds a reference to it rather than emitting through a
/// process-global singleton.
pub struct Metrics {
    started_at: Instant,

    errors_total: AtomicU64,
    errors_by_severity: SeverityCounters,
    advice_cache_hit: AtomicU64,
    advice_cache_miss: AtomicU64,
    queue_reject_capacity: AtomicU64,
    queue_reject_memory: AtomicU64,
    circuit_open_transitions: AtomicU64,
    rate_limit_hits: AtomicU64,
    http_retries: AtomicU64,
    http_failures_by_code: Mutex<HashMap<u16, u64>>,
    log_drop: AtomicU64,
    errors_suppressed: AtomicU64,

    queue_length: AtomicU64,
    queue_capacity: AtomicU64,
    cache_entries: AtomicU64,
    cache_bytes: AtomicU64,
    memory_heap_used_percent: AtomicU64,

    analysis_duration_ms: Mutex<CircularBuffer>,
    http_request_duration_ms: Mutex<CircularBuffer>,
}

const HISTOGRAM_CAPACITY: usize = 1000;

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            errors_total: AtomicU64::new(0),
            errors_by_severity: SeverityCounters::default(),
            advice_cache_hit: AtomicU64::new(0),
            advice_cache_miss: AtomicU64::new(0),
            queue_reject_capacity: AtomicU64::new(0),
            queue_reject_memory: AtomicU64::new(0),
            circuit_open_transitions: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            http_retries: AtomicU64::new(0),
            http_failures_by_code: Mutex::new(HashMap::new()),
            log_drop: AtomicU64::new(0),
            errors_suppressed: AtomicU64::new(0),
            queue_length: AtomicU64::new(0),
            queue_capacity: AtomicU64::new(0),
            cache_entries: AtomicU64::new(0),
            cache_bytes: AtomicU64::new(0),
            memory_heap_used_percent: AtomicU64::new(0),
            analysis_duration_ms: Mutex::new(CircularBuffer::new(HISTOGRAM_CAPACITY)),
            http_request_duration_ms: Mutex::new(CircularBuffer::new(HISTOGRAM_CAPACITY)),
        }
    }

    pub fn record_error(&self, severity: Severity) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        self.errors_by_severity.bump(severity);
    }

    pub fn record_cache_hit(&self) {
        self.advice_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.advice_cache_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_reject_capacity(&self) {
        self.queue_reject_capacity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_reject_memory(&self) {
        self.queue_reject_memory.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_open_transition(&self) {
        self.circuit_open_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_retry(&self) {
        self.http_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_failure(&self, status_or_zero: u16) {
        let mut map = self.http_failures_by_code.lock().unwrap();
        *map.entry(status_or_zero).or_insert(0) += 1;
    }

    pub fn record_log_drop(&self) {
        self.log_drop.fetch_add(1, Ordering::Relaxed);
    }

    /// A recurring error's per-fingerprint rate limiter had no token left,
    /// so the middleware skipped re-enqueueing it for analysis.
    pub fn record_error_suppressed(&self) {
        self.errors_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_length(&self, length: u64, capacity: u64) {
        self.queue_length.store(length, Ordering::Relaxed);
        self.queue_capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn set_cache_stats(&self, entries: u64, bytes: u64) {
        self.cache_entries.store(entries, Ordering::Relaxed);
        self.cache_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_memory_heap_used_percent(&self, percent: u64) {
        self.memory_heap_used_percent.store(percent, Ordering::Relaxed);
    }

    pub fn record_analysis_duration_ms(&self, ms: f64) {
        self.analysis_duration_ms.lock().unwrap().push(ms);
    }

    pub fn record_http_request_duration_ms(&self, ms: f64) {
        self.http_request_duration_ms.lock().unwrap().push(ms);
    }

    /// Full JSON snapshot for `GET /metrics`.
    pub fn snapshot(&self, circuit_state: CircuitState) -> MetricsSnapshot {
        let duration_hist = self.analysis_duration_ms.lock().unwrap();
        let http_hist = self.http_request_duration_ms.lock().unwrap();

        MetricsSnapshot {
            counters: CountersSnapshot {
                errors_total: self.errors_total.load(Ordering::Relaxed),
                errors_by_severity: self.errors_by_severity.snapshot(),
                advice_cache_hit: self.advice_cache_hit.load(Ordering::Relaxed),
                advice_cache_miss: self.advice_cache_miss.load(Ordering::Relaxed),
                queue_reject_capacity: self.queue_reject_capacity.load(Ordering::Relaxed),
                queue_reject_memory: self.queue_reject_memory.load(Ordering::Relaxed),
                circuit_open_transitions: self.circuit_open_transitions.load(Ordering::Relaxed),
                rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
                http_retries: self.http_retries.load(Ordering::Relaxed),
                http_failures_by_code: self.http_failures_by_code.lock().unwrap().clone(),
                log_drop: self.log_drop.load(Ordering::Relaxed),
                errors_suppressed: self.errors_suppressed.load(Ordering::Relaxed),
            },
            gauges: GaugesSnapshot {
                queue_length: self.queue_length.load(Ordering::Relaxed),
                queue_capacity: self.queue_capacity.load(Ordering::Relaxed),
                cache_entries: self.cache_entries.load(Ordering::Relaxed),
                cache_bytes: self.cache_bytes.load(Ordering::Relaxed),
                circuit_state: circuit_state.as_str(),
                memory_heap_used_percent: self.memory_heap_used_percent.load(Ordering::Relaxed),
            },
            histograms: HistogramsSnapshot {
                analysis_duration_ms: Percentiles::from(&duration_hist),
                http_request_duration_ms: Percentiles::from(&http_hist),
            },
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }

    /// `GET /health`: healthy unless memory is at/above critical or
    /// the circuit is open.
    pub fn health(&self, circuit_state: CircuitState, queue_capacity: u64) -> HealthSnapshot {
        let heap_used_percent = self.memory_heap_used_percent.load(Ordering::Relaxed);
        let degraded = heap_used_percent >= 90 || circuit_state == CircuitState::Open;

        HealthSnapshot {
            status: if degraded { "degraded" } else { "healthy" },
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            queue: QueueHealth {
                length: self.queue_length.load(Ordering::Relaxed),
                capacity: queue_capacity,
            },
            circuit: CircuitHealth {
                state: circuit_state.as_str(),
            },
            memory: MemoryHealth { heap_used_percent },
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct Percentiles {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl From<&CircularBuffer> for Percentiles {
    fn from(buf: &CircularBuffer) -> Self {
        Self {
            p50: buf.p50(),
            p95: buf.p95(),
            p99: buf.p99(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CountersSnapshot {
    pub errors_total: u64,
    pub errors_by_severity: HashMap<&'static str, u64>,
    pub advice_cache_hit: u64,
    pub advice_cache_miss: u64,
    pub queue_reject_capacity: u64,
    pub queue_reject_memory: u64,
    pub circuit_open_transitions: u64,
    pub rate_limit_hits: u64,
    pub http_retries: u64,
    pub http_failures_by_code: HashMap<u16, u64>,
    pub log_drop: u64,
    pub errors_suppressed: u64,
}

#[derive(Debug, Serialize)]
pub struct GaugesSnapshot {
    pub queue_length: u64,
    pub queue_capacity: u64,
    pub cache_entries: u64,
    pub cache_bytes: u64,
    pub circuit_state: &'static str,
    pub memory_heap_used_percent: u64,
}

#[derive(Debug, Serialize)]
pub struct HistogramsSnapshot {
    pub analysis_duration_ms: Percentiles,
    pub http_request_duration_ms: Percentiles,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub counters: CountersSnapshot,
    pub gauges: GaugesSnapshot,
    pub histograms: HistogramsSnapshot,
    pub uptime_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub length: u64,
    pub capacity: u64,
}

#[derive(Debug, Serialize)]
pub struct CircuitHealth {
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MemoryHealth {
    pub heap_used_percent: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub queue: QueueHealth,
    pub circuit: CircuitHealth,
    pub memory: MemoryHealth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_is_degraded_when_memory_critical() {
        let metrics = Metrics::new();
        metrics.set_memory_heap_used_percent(95);
        let health = metrics.health(CircuitState::Closed, 200);
        assert_eq!(health.status, "degraded");
    }

    #[test]
    fn health_is_degraded_when_circuit_open() {
        let metrics = Metrics::new();
        let health = metrics.health(CircuitState::Open, 200);
        assert_eq!(health.status, "degraded");
    }

    #[test]
    fn health_is_healthy_by_default() {
        let metrics = Metrics::new();
        let health = metrics.health(CircuitState::Closed, 200);
        assert_eq!(health.status, "healthy");
    }

    #[test]
    fn counters_increment() {
        let metrics = Metrics::new();
        metrics.record_error(Severity::High);
        metrics.record_cache_hit();
        let snapshot = metrics.snapshot(CircuitState::Closed);
        assert_eq!(snapshot.counters.errors_total, 1);
        assert_eq!(snapshot.counters.errors_by_severity["high"], 1);
        assert_eq!(snapshot.counters.advice_cache_hit, 1);
    }
}
