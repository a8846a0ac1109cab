//! Async, bounded, level-filtered structured log emission with daily
//! rotation. This is qerrors' *product* logging of caller-supplied
//! `ErrorRecord`s, distinct from [`crate::logging`], which is the crate's
//! own internal diagnostics via `tracing`.
//!
//! A single background task owns the open file handle; `log()` itself
//! never blocks on I/O and never propagates a failure to the caller.

use crate::collections::{BoundedQueue, PushOutcome};
use crate::config::LogLevel;
use crate::metrics::Metrics;
use crate::record::LogEntry;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};

const STDERR_REPORT_INTERVAL: Duration = Duration::from_secs(60);

pub struct StructuredLogger {
    queue: Mutex<BoundedQueue<LogEntry>>,
    notify: Notify,
    level: LogLevel,
    metrics: Arc<Metrics>,
    writer: StdMutex<Box<dyn Write + Send>>,
    last_io_error_report: StdMutex<Option<Instant>>,
    closed: AtomicBool,
}

impl StructuredLogger {
    /// Build the logger and spawn its single background writer task.
    /// `log_max_days == 0` means unbounded retention (no file deletion).
    pub fn new(
        level: LogLevel,
        queue_limit: u32,
        log_dir: &str,
        log_max_days: u32,
        metrics: Arc<Metrics>,
    ) -> std::io::Result<Arc<Self>> {
        std::fs::create_dir_all(log_dir)?;

        let mut builder = RollingBuilder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix("qerrors")
            .filename_suffix("log");
        if log_max_days > 0 {
            builder = builder.max_log_files(log_max_days as usize);
        }
        let appender = builder
            .build(log_dir)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let logger = Arc::new(Self {
            queue: Mutex::new(BoundedQueue::new(queue_limit as usize, usize::MAX, true)),
            notify: Notify::new(),
            level,
            metrics,
            writer: StdMutex::new(Box::new(appender)),
            last_io_error_report: StdMutex::new(None),
            closed: AtomicBool::new(false),
        });

        let worker = logger.clone();
        tokio::spawn(async move { worker.run().await });

        Ok(logger)
    }

    /// Non-blocking: enqueues a [`LogEntry`] for the background writer.
    /// Entries below the configured level are discarded here, before
    /// they ever reach the queue.
    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        meta: Option<HashMap<String, serde_json::Value>>,
        request_id: Option<String>,
    ) {
        if level < self.level {
            return;
        }

        let entry = LogEntry::new(level, message, meta, request_id);
        if level >= LogLevel::Warn {
            eprintln!("{}", entry.to_json_line());
        }

        let mut guard = self.queue.lock().await;
        match guard.push(entry, 0) {
            PushOutcome::Accepted => {}
            PushOutcome::AcceptedDroppedOldest | PushOutcome::Rejected => {
                self.metrics.record_log_drop();
            }
        }
        drop(guard);
        self.notify.notify_one();
    }

    /// Stop the background writer after the queue drains (or `grace`
    /// elapses, whichever comes first).
    pub async fn flush(&self, grace: Duration) {
        let _ = tokio::time::timeout(grace, async {
            loop {
                if self.queue.lock().await.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn run(self: Arc<Self>) {
        loop {
            let entry = {
                let mut guard = self.queue.lock().await;
                guard.pop()
            };

            let Some(entry) = entry else {
                if self.closed.load(Ordering::Acquire) {
                    return;
                }
                self.notify.notified().await;
                continue;
            };

            let line = entry.to_json_line();
            let result = {
                let mut writer = self.writer.lock().unwrap();
                writeln!(writer, "{line}")
            };
            if let Err(error) = result {
                self.report_io_error(&error);
            }
        }
    }

    fn report_io_error(&self, error: &std::io::Error) {
        let mut last = self.last_io_error_report.lock().unwrap();
        let now = Instant::now();
        if last.map_or(true, |t| now.duration_since(t) >= STDERR_REPORT_INTERVAL) {
            eprintln!("qerrors: log writer I/O error: {error}");
            *last = Some(now);
        }
    }
}
