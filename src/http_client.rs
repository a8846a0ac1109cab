//! Rate-limited, circuit-broken, deduplicated HTTP client for the upstream
//! LLM endpoint.
//!
//! One shared `reqwest::Client`, auth headers built once, a single-request
//! executor wrapped by a retry loop, with a rate gate, circuit breaker, and
//! request-dedup stage composed in front of that retry loop.

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::{QerrorsError, QerrorsResult};
use crate::logging::{log_debug, log_error, log_warn};
use crate::metrics::Metrics;
use crate::rate_limiter::HttpRateLimiter;
use crate::record::{Advice, ErrorRecord, Remediation};
use crate::request_cache::{RequestCache, SharedAnalysisError};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SYSTEM_PROMPT: &str = "You are an error-analysis assistant. Given a JSON-encoded application \
error, respond with a JSON object containing exactly `diagnosis` (a short string) and \
`remediation` (a short string or an ordered list of steps), and optionally `confidence` \
(a number between 0 and 1). Respond with only the JSON object, no prose.";

const MAX_PAYLOAD_BYTES: usize = 512 * 1024;
const BASE_BACKOFF_MS: u64 = 250;

fn fenced_json_pattern() -> Regex {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap()
}

/// `analyse(record) -> Advice`, or one of the self-protection / upstream
/// failure kinds in [`QerrorsError`].
pub struct HttpClient {
    client: reqwest::Client,
    config: Arc<Config>,
    rate_limiter: HttpRateLimiter,
    circuit_breaker: Mutex<CircuitBreaker>,
    request_cache: RequestCache,
    metrics: Arc<Metrics>,
}

impl HttpClient {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(config.http_timeout * (config.http_max_retries + 1))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            rate_limiter: HttpRateLimiter::new(
                config.http_rate_tokens_per_sec,
                config.http_rate_burst,
            ),
            circuit_breaker: Mutex::new(CircuitBreaker::new(
                config.circuit_error_threshold,
                config.circuit_window,
                config.circuit_reset,
            )),
            request_cache: RequestCache::new(config.http_response_cache_ttl),
            config,
            metrics,
        }
    }

    pub async fn circuit_state(&self) -> crate::circuit_breaker::CircuitState {
        self.circuit_breaker.lock().await.state()
    }

    /// Analyse `record`, returning remediation advice or one of the
    /// self-protection / upstream failure kinds.
    pub async fn analyse(self: &Arc<Self>, record: &ErrorRecord) -> QerrorsResult<Advice> {
        if self.rate_limiter.check().is_err() {
            self.metrics.record_rate_limit_hit();
            return Err(QerrorsError::RateLimited);
        }

        {
            let mut breaker = self.circuit_breaker.lock().await;
            if !breaker.should_allow_request() {
                let open_until_epoch_ms = breaker.open_until_epoch_ms().unwrap_or(0);
                return Err(QerrorsError::CircuitOpen {
                    open_until_epoch_ms,
                });
            }
        }

        let body = self.build_request_body(record);
        let key = record.fingerprint.0;

        if let Some(advice) = self.request_cache.completed_lookup(key).await {
            return Ok(advice);
        }

        let this = self.clone();
        let result = self
            .request_cache
            .dedup(key, move || {
                Box::pin(async move {
                    this.retry_loop(body)
                        .await
                        .map_err(|e| SharedAnalysisError(e.to_string()))
                })
            })
            .await;

        match result {
            Ok(advice) => {
                self.request_cache.store_completed(key, advice.clone()).await;
                Ok(advice)
            }
            Err(shared) => Err(QerrorsError::upstream(shared.0, None)),
        }
    }

    fn build_request_body(&self, record: &ErrorRecord) -> serde_json::Value {
        let mut user_content = record.to_llm_payload().to_string();
        if user_content.len() > MAX_PAYLOAD_BYTES {
            let cut = user_content
                .char_indices()
                .take_while(|(idx, _)| *idx <= MAX_PAYLOAD_BYTES)
                .last()
                .map(|(idx, ch)| idx + ch.len_utf8())
                .unwrap_or(0);
            user_content.truncate(cut);
            user_content.push_str("…[truncated]");
        }

        serde_json::json!({
            "model": self.config.model_name,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_content},
            ],
            "response_format": {"type": "json_object"},
            "max_completion_tokens": 1024,
            "temperature": 0,
        })
    }

    fn auth_headers(&self) -> QerrorsResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent())
                .unwrap_or_else(|_| HeaderValue::from_static("qerrors")),
        );
        if let Some(key) = &self.config.model_api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                QerrorsError::configuration_error(format!("invalid MODEL_API_KEY format: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn retry_loop(&self, body: serde_json::Value) -> QerrorsResult<Advice> {
        let headers = self.auth_headers()?;
        let max_attempts = self.config.http_max_retries + 1;
        let mut attempt = 0;
        let mut parse_retried = false;

        loop {
            attempt += 1;
            log_debug!(attempt = attempt, max_attempts = max_attempts, "sending request to upstream LLM");

            let outcome = tokio::time::timeout(
                self.config.http_timeout,
                self.single_request(&headers, &body),
            )
            .await;

            let error = match outcome {
                Ok(Ok(advice)) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(advice);
                }
                Ok(Err(e)) => e,
                Err(_) => QerrorsError::timeout(self.config.http_timeout.as_millis() as u64),
            };

            self.metrics.record_http_failure(failure_status_code(&error));
            if self.circuit_breaker.lock().await.record_failure() {
                self.metrics.record_circuit_open_transition();
            }

            // A parse failure gets exactly one extra retry regardless of
            // HTTP_MAX_RETRIES: malformed JSON from the model is often a
            // one-off sampling fluke, not a systemic upstream failure.
            let is_parse_failure = matches!(error, QerrorsError::ParseError { .. });
            if is_parse_failure && !parse_retried {
                parse_retried = true;
                self.metrics.record_http_retry();
                continue;
            }

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(error);
            }

            let delay = self.backoff_delay(attempt);
            log_warn!(attempt = attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying after upstream failure");
            self.metrics.record_http_retry();
            tokio::time::sleep(delay).await;
        }
    }

    /// Exponential backoff with full jitter, seeded at 250ms.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10));
        let jittered = (exp as f64 * fastrand::f64()) as u64;
        Duration::from_millis(jittered.max(1))
    }

    async fn single_request(
        &self,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> QerrorsResult<Advice> {
        let response = self
            .client
            .post(&self.config.model_endpoint)
            .headers(headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                log_error!(error = %e, "upstream request failed at transport level");
                QerrorsError::upstream(e.to_string(), Some(Box::new(e)))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = retry_after_duration(response.headers());
            let body_text = response.text().await.unwrap_or_default();
            log_warn!(status = status, body = %body_text, "upstream returned non-2xx status");

            if let Some(delay) = retry_after {
                tokio::time::sleep(delay).await;
            }
            return Err(QerrorsError::upstream_status(status));
        }

        let raw_body = response
            .text()
            .await
            .map_err(|e| QerrorsError::upstream(e.to_string(), Some(Box::new(e))))?;

        parse_advice_response(&raw_body)
    }
}

/// The HTTP status behind a failed attempt, or 0 for failures with no
/// status (transport errors, timeouts, parse failures).
fn failure_status_code(error: &QerrorsError) -> u16 {
    match error {
        QerrorsError::UpstreamStatus { status } => *status,
        _ => 0,
    }
}

fn retry_after_duration(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = headers
        .get("retry-after-ms")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }

    let raw = headers.get("retry-after")?.to_str().ok()?;
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = when.timestamp_millis() - chrono::Utc::now().timestamp_millis();
    Some(Duration::from_millis(delta.max(0) as u64))
}

fn parse_advice_response(raw_body: &str) -> QerrorsResult<Advice> {
    let envelope: serde_json::Value = serde_json::from_str(raw_body)
        .map_err(|e| QerrorsError::parse_error(format!("invalid JSON envelope: {e}")))?;

    let content = envelope
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| QerrorsError::parse_error("missing choices[0].message.content"))?;

    let unwrapped = strip_json_fence(content);

    let parsed: serde_json::Value = serde_json::from_str(unwrapped.trim())
        .map_err(|e| QerrorsError::parse_error(format!("invalid advice JSON: {e}")))?;

    let diagnosis = parsed
        .get("diagnosis")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QerrorsError::parse_error("advice missing `diagnosis`"))?
        .to_string();

    let remediation = match parsed.get("remediation") {
        Some(serde_json::Value::String(s)) => Remediation::Single(s.clone()),
        Some(serde_json::Value::Array(items)) => Remediation::Steps(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => return Err(QerrorsError::parse_error("advice missing `remediation`")),
    };

    let confidence = parsed.get("confidence").and_then(|v| v.as_f64());

    Ok(Advice::new(diagnosis, remediation, confidence))
}

fn strip_json_fence(content: &str) -> String {
    let pattern = fenced_json_pattern();
    match pattern.captures(content) {
        Some(captures) => captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| content.to_string()),
        None => content.to_string(),
    }
}
