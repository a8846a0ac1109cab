//! Framework-agnostic error-capture entry point.
//!
//! This is the one function most callers ever touch: hand it a caught
//! error plus optional HTTP context, and it sanitises, logs, optionally
//! shapes an HTTP response, and enqueues the error for background
//! analysis — all without ever panicking or propagating a failure back
//! to the caller.

use crate::config::LogLevel;
use crate::fingerprint::Fingerprint;
use crate::metrics::Metrics;
use crate::queue::AnalysisQueue;
use crate::rate_limiter::ErrorRateLimiter;
use crate::record::ErrorRecord;
use crate::sanitiser::{sanitise_context, sanitise_string};
use crate::severity::Severity;
use crate::structured_logger::StructuredLogger;
use std::collections::HashMap;
use std::sync::Arc;

/// What the caller caught, before sanitisation.
///
/// `severity` is `None` when the caller doesn't know or care; it's then
/// derived from `name` via [`Severity::classify`].
#[derive(Debug, Clone)]
pub struct CapturedError {
    pub name: String,
    pub message: String,
    pub stack: Vec<String>,
    pub severity: Option<Severity>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl CapturedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: Vec::new(),
            severity: None,
            context: None,
        }
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Some(context);
        self
    }
}

/// The caller's HTTP request, when the error was caught inside a request
/// handler. Passing `None` for this in [`QerrorsMiddleware::handle`] means
/// "no response to shape" — only logging and background analysis happen.
#[derive(Debug, Clone, Default)]
pub struct HttpErrorContext {
    pub method: Option<String>,
    pub path: Option<String>,
    /// Raw `Accept` header value; content negotiation looks for
    /// `text/html` and otherwise defaults to JSON.
    pub accept: Option<String>,
    /// Overrides [`Severity::default_status_code`] when the caller's error
    /// already carries an explicit HTTP status.
    pub status_override: Option<u16>,
    pub request_id: Option<String>,
}

/// A shaped HTTP response body for the caller to write back to its
/// client, content-negotiated from [`HttpErrorContext::accept`].
#[derive(Debug, Clone)]
pub struct MiddlewareResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

fn log_level_for(severity: Severity) -> LogLevel {
    match severity {
        Severity::Low => LogLevel::Info,
        Severity::Medium => LogLevel::Warn,
        Severity::High => LogLevel::Error,
        Severity::Critical => LogLevel::Fatal,
    }
}

fn render_response(record: &ErrorRecord, status: u16, accept: Option<&str>) -> MiddlewareResponse {
    let wants_html = accept.map(|a| a.contains("text/html")).unwrap_or(false);
    if wants_html {
        let body = format!(
            "<html><body><h1>Error</h1><p>{}</p></body></html>",
            html_escape(&record.message)
        );
        MiddlewareResponse {
            status,
            content_type: "text/html; charset=utf-8",
            body,
        }
    } else {
        let body = serde_json::json!({
            "error": record.name,
            "message": record.message,
            "severity": record.severity,
            "requestId": record.request_id,
        })
        .to_string();
        MiddlewareResponse {
            status,
            content_type: "application/json",
            body,
        }
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Ties sanitisation, logging, response shaping, and enqueue-for-analysis
/// into the single operation callers invoke from their error-handling path.
pub struct QerrorsMiddleware {
    logger: Arc<StructuredLogger>,
    queue: Arc<AnalysisQueue>,
    error_rate_limiter: Arc<ErrorRateLimiter>,
    metrics: Arc<Metrics>,
    sanitiser_max_depth: usize,
    sanitiser_max_properties: usize,
    sanitiser_max_string_len: usize,
}

impl QerrorsMiddleware {
    pub fn new(
        logger: Arc<StructuredLogger>,
        queue: Arc<AnalysisQueue>,
        error_rate_limiter: Arc<ErrorRateLimiter>,
        metrics: Arc<Metrics>,
        sanitiser_max_depth: usize,
        sanitiser_max_properties: usize,
        sanitiser_max_string_len: usize,
    ) -> Self {
        Self {
            logger,
            queue,
            error_rate_limiter,
            metrics,
            sanitiser_max_depth,
            sanitiser_max_properties,
            sanitiser_max_string_len,
        }
    }

    /// Capture one error. Never panics and never returns an `Err` to the
    /// caller; a `None` result just means there's no HTTP response to send
    /// (either because `http` was `None`, or shaping it somehow failed).
    pub async fn handle(
        &self,
        error: CapturedError,
        http: Option<HttpErrorContext>,
    ) -> Option<MiddlewareResponse> {
        let severity = error.severity.unwrap_or_else(|| Severity::classify(&error.name));
        let message = sanitise_string(&error.message, self.sanitiser_max_string_len);
        let stack: Vec<String> = error
            .stack
            .iter()
            .map(|frame| sanitise_string(frame, self.sanitiser_max_string_len))
            .collect();
        let context = error.context.as_ref().map(|c| {
            sanitise_context(
                c,
                self.sanitiser_max_depth,
                self.sanitiser_max_properties,
                self.sanitiser_max_string_len,
            )
        });

        let request_id = http
            .as_ref()
            .and_then(|h| h.request_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let record = ErrorRecord::new(
            error.name.clone(),
            message,
            stack,
            severity,
            Some(request_id),
            context,
        );

        self.metrics.record_error(severity);
        self.logger
            .log(
                log_level_for(severity),
                format!("{}: {}", record.name, record.message),
                record.context.clone(),
                record.request_id.clone(),
            )
            .await;

        self.maybe_enqueue(record.fingerprint, record.clone()).await;

        http.map(|ctx| {
            let status = ctx
                .status_override
                .unwrap_or_else(|| severity.default_status_code());
            render_response(&record, status, ctx.accept.as_deref())
        })
    }

    async fn maybe_enqueue(&self, fingerprint: Fingerprint, record: ErrorRecord) {
        if !self.error_rate_limiter.allow(fingerprint) {
            self.metrics.record_error_suppressed();
            return;
        }
        let _ = self.queue.enqueue(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel as Lvl;
    use std::time::Duration;

    async fn middleware() -> QerrorsMiddleware {
        let metrics = Arc::new(Metrics::new());
        let dir = std::env::temp_dir().join(format!(
            "qerrors-middleware-test-{:?}",
            std::thread::current().id()
        ));
        let logger = StructuredLogger::new(Lvl::Debug, 100, dir.to_str().unwrap(), 0, metrics.clone()).unwrap();
        let queue = Arc::new(AnalysisQueue::new(10, metrics.clone(), Duration::from_secs(30)));
        let limiter = Arc::new(ErrorRateLimiter::new(5, 5));
        QerrorsMiddleware::new(logger, queue, limiter, metrics, 5, 100, 8192)
    }

    #[tokio::test]
    async fn returns_json_response_by_default() {
        let mw = middleware().await;
        let error = CapturedError::new("DBError", "conn refused");
        let ctx = HttpErrorContext::default();
        let response = mw.handle(error, Some(ctx)).await.unwrap();
        assert_eq!(response.content_type, "application/json");
        assert_eq!(response.status, 500);
        assert!(response.body.contains("conn refused"));
    }

    #[tokio::test]
    async fn renders_html_when_accept_requests_it() {
        let mw = middleware().await;
        let error = CapturedError::new("ValidationError", "bad field");
        let ctx = HttpErrorContext {
            accept: Some("text/html".to_string()),
            ..Default::default()
        };
        let response = mw.handle(error, Some(ctx)).await.unwrap();
        assert_eq!(response.content_type, "text/html; charset=utf-8");
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn status_override_wins_over_severity_default() {
        let mw = middleware().await;
        let error = CapturedError::new("DBError", "conn refused").with_severity(Severity::Critical);
        let ctx = HttpErrorContext {
            status_override: Some(503),
            ..Default::default()
        };
        let response = mw.handle(error, Some(ctx)).await.unwrap();
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn no_http_context_means_no_response() {
        let mw = middleware().await;
        let error = CapturedError::new("E", "m");
        assert!(mw.handle(error, None).await.is_none());
    }

    #[tokio::test]
    async fn suppresses_recurring_enqueue_past_burst_but_still_logs() {
        let mw = middleware().await;
        for _ in 0..5 {
            let error = CapturedError::new("Flaky", "same fingerprint");
            mw.handle(error, None).await;
        }
        let over_burst = CapturedError::new("Flaky", "same fingerprint");
        mw.handle(over_burst, None).await;
        assert_eq!(mw.metrics.snapshot(crate::circuit_breaker::CircuitState::Closed).counters.errors_suppressed, 1);
    }
}
