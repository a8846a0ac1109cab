//! Bounded analysis queue with a memory-pressure admission gate and a
//! worker pool that drains it into the analysis pipeline.

use crate::collections::{BoundedQueue, PushOutcome};
use crate::metrics::Metrics;
use crate::pipeline::AnalysisPipeline;
use crate::record::ErrorRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

/// Coarse memory-pressure bucket used to gate admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryLevel {
    fn from_percent(percent: u64) -> Self {
        if percent >= 90 {
            Self::Critical
        } else if percent >= 75 {
            Self::High
        } else if percent >= 60 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Reads `VmRSS` from `/proc/self/status` and `MemTotal` from
/// `/proc/meminfo`; returns 0 (never fails, never panics) when either file
/// is unreadable or unparsable, which simply disables the memory gate
/// rather than rejecting admission.
pub fn heap_used_percent() -> u64 {
    let rss_kb = read_proc_field("/proc/self/status", "VmRSS:");
    let total_kb = read_proc_field("/proc/meminfo", "MemTotal:");

    match (rss_kb, total_kb) {
        (Some(rss), Some(total)) if total > 0 => ((rss as u128 * 100) / total as u128) as u64,
        _ => 0,
    }
}

fn read_proc_field(path: &str, prefix: &str) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.lines().find_map(|line| {
        let rest = line.strip_prefix(prefix)?;
        rest.trim().split_whitespace().next()?.parse::<u64>().ok()
    })
}

/// A queued analysis: the sanitised record plus when it arrived.
pub struct AnalysisRequest {
    pub record: ErrorRecord,
    pub enqueued_at: Instant,
}

/// Why `enqueue` refused an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueRejection {
    Capacity,
    Memory,
}

pub struct AnalysisQueue {
    inner: Mutex<BoundedQueue<AnalysisRequest>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
    item_timeout: Duration,
}

impl AnalysisQueue {
    pub fn new(capacity: u32, metrics: Arc<Metrics>, item_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BoundedQueue::new(capacity as usize, usize::MAX, false)),
            notify: Notify::new(),
            capacity: capacity as usize,
            closed: AtomicBool::new(false),
            metrics,
            item_timeout,
        }
    }

    /// Admit `record` if memory and capacity gates allow it.
    pub async fn enqueue(&self, record: ErrorRecord) -> Result<(), EnqueueRejection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueRejection::Capacity);
        }

        let percent = heap_used_percent();
        self.metrics.set_memory_heap_used_percent(percent);
        let level = MemoryLevel::from_percent(percent);
        if level == MemoryLevel::Critical {
            self.metrics.record_queue_reject_memory();
            return Err(EnqueueRejection::Memory);
        }

        let effective_capacity = if level == MemoryLevel::High {
            (self.capacity / 2).max(1)
        } else {
            self.capacity
        };

        let mut guard = self.inner.lock().await;
        if guard.len() >= effective_capacity {
            self.metrics.record_queue_reject_capacity();
            return Err(EnqueueRejection::Capacity);
        }

        let item = AnalysisRequest {
            record,
            enqueued_at: Instant::now(),
        };
        match guard.push(item, 0) {
            PushOutcome::Accepted | PushOutcome::AcceptedDroppedOldest => {
                self.metrics
                    .set_queue_length(guard.len() as u64, self.capacity as u64);
                drop(guard);
                self.notify.notify_one();
                Ok(())
            }
            PushOutcome::Rejected => {
                self.metrics.record_queue_reject_capacity();
                Err(EnqueueRejection::Capacity)
            }
        }
    }

    /// Stop accepting new items. Already-queued items are still drained by
    /// workers until empty or the caller's grace period elapses.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn pop(&self) -> Option<AnalysisRequest> {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(item) = guard.pop() {
                    self.metrics
                        .set_queue_length(guard.len() as u64, self.capacity as u64);
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Wait (up to `grace`) for the queue to drain after [`Self::close`].
    /// Does not itself stop workers; it just bounds how long a caller
    /// waits before giving up on a clean drain.
    pub async fn wait_until_empty(&self, grace: Duration) {
        let _ = tokio::time::timeout(grace, async {
            loop {
                if self.inner.lock().await.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
    }

    /// Run one worker loop to completion: pop, analyse under the per-item
    /// timeout, repeat until the queue is closed and drained. Spawn up to
    /// `CONCURRENCY_LIMIT` of these from the composition root.
    pub async fn run_worker(self: Arc<Self>, pipeline: Arc<AnalysisPipeline>) {
        while let Some(item) = self.pop().await {
            let _ = tokio::time::timeout(self.item_timeout, pipeline.analyse(&item.record)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;

    fn record() -> ErrorRecord {
        ErrorRecord::new("E", "m", vec![], Severity::High, None, None)
    }

    #[tokio::test]
    async fn rejects_beyond_capacity() {
        let metrics = Arc::new(Metrics::new());
        let queue = AnalysisQueue::new(2, metrics, Duration::from_secs(30));
        assert!(queue.enqueue(record()).await.is_ok());
        assert!(queue.enqueue(record()).await.is_ok());
        assert_eq!(queue.enqueue(record()).await, Err(EnqueueRejection::Capacity));
    }

    #[tokio::test]
    async fn close_then_drain_stops_accepting() {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(AnalysisQueue::new(10, metrics, Duration::from_secs(30)));
        queue.enqueue(record()).await.unwrap();
        queue.close();
        assert_eq!(queue.enqueue(record()).await, Err(EnqueueRejection::Capacity));
        assert_eq!(queue.len().await, 1);
    }

    #[test]
    fn memory_level_thresholds() {
        assert_eq!(MemoryLevel::from_percent(10), MemoryLevel::Low);
        assert_eq!(MemoryLevel::from_percent(65), MemoryLevel::Medium);
        assert_eq!(MemoryLevel::from_percent(80), MemoryLevel::High);
        assert_eq!(MemoryLevel::from_percent(95), MemoryLevel::Critical);
    }

    #[test]
    fn heap_used_percent_never_panics() {
        let _ = heap_used_percent();
    }

    #[tokio::test]
    async fn enqueue_publishes_the_live_memory_gauge() {
        let metrics = Arc::new(Metrics::new());
        let queue = AnalysisQueue::new(10, metrics.clone(), Duration::from_secs(30));
        queue.enqueue(record()).await.unwrap();

        let snapshot = metrics.snapshot(crate::circuit_breaker::CircuitState::Closed);
        assert_eq!(snapshot.gauges.memory_heap_used_percent, heap_used_percent());
    }
}
