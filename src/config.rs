//! Typed configuration for qerrors.
//!
//! Every numeric knob is read from the environment, clamped to a safe
//! range, and emits a `tracing::warn!` when the supplied value needed
//! clamping, so a misconfigured deployment degrades to a safe default
//! instead of silently running with a nonsensical value.

use crate::error::{QerrorsError, QerrorsResult};
use crate::logging::log_warn;
use std::time::Duration;

/// Read a `u64` environment variable, falling back to `default` when unset
/// or unparsable, and clamping (with a warning) into `[min, max]`.
pub fn get_int(name: &str, default: u64, min: u64, max: u64) -> u64 {
    let raw = match std::env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parsed = match raw.parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            log_warn!(var = name, value = %raw, "invalid integer env var, using default");
            return default;
        }
    };

    clamp_u64(name, parsed, min, max)
}

fn clamp_u64(name: &str, value: u64, min: u64, max: u64) -> u64 {
    if value < min {
        log_warn!(var = name, value = value, min = min, "value below minimum, clamping");
        min
    } else if value > max {
        log_warn!(var = name, value = value, max = max, "value above maximum, clamping");
        max
    } else {
        value
    }
}

/// Read a boolean environment variable (`"1"`, `"true"`, `"yes"` are truthy,
/// case-insensitively; anything else is falsy).
pub fn get_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Read a string environment variable, falling back to `default` when unset.
pub fn get_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read an optional string environment variable (no default; `None` when
/// unset or empty).
pub fn get_optional_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read a millisecond-valued duration environment variable, clamped into
/// `[min_ms, max_ms]`.
pub fn get_duration_ms(name: &str, default_ms: u64, min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(get_int(name, default_ms, min_ms, max_ms))
}

/// Log verbosity level for the structured logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    fn from_str_or_default(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "fatal" => Self::Fatal,
            other => {
                log_warn!(value = %other, "unrecognized LOG_LEVEL, defaulting to info");
                Self::Info
            }
        }
    }
}

/// Process-wide qerrors configuration.
///
/// Constructed once via [`Config::from_env`] and handed to
/// [`crate::engine::QerrorsEngine::new`]. Tests construct their own
/// instance via [`Config::default`] plus field overrides rather than
/// mutating process environment globally wherever avoidable.
#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency_limit: u32,
    pub queue_limit: u32,
    pub cache_limit: u32,
    pub cache_ttl: Duration,
    pub max_advice_size: usize,
    pub http_timeout: Duration,
    pub http_max_retries: u32,
    pub http_rate_tokens_per_sec: u32,
    pub http_rate_burst: u32,
    pub http_response_cache_ttl: Duration,
    pub circuit_error_threshold: u32,
    pub circuit_reset: Duration,
    pub circuit_window: Duration,
    pub log_level: LogLevel,
    pub log_max_days: u32,
    pub log_queue_limit: u32,
    pub log_dir: String,
    pub verbose: bool,
    pub model_provider: Option<String>,
    pub model_name: String,
    pub model_api_key: Option<String>,
    pub model_endpoint: String,
    pub service_name: String,
    pub error_rate_limit_per_min: u32,
    pub error_rate_limit_burst: u32,
    pub analysis_item_timeout: Duration,
    pub shutdown_grace: Duration,
    pub sanitiser_max_depth: usize,
    pub sanitiser_max_properties: usize,
    pub sanitiser_max_string_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            queue_limit: 200,
            cache_limit: 1000,
            cache_ttl: Duration::from_millis(3_600_000),
            max_advice_size: 524_288,
            http_timeout: Duration::from_millis(30_000),
            http_max_retries: 3,
            http_rate_tokens_per_sec: 10,
            http_rate_burst: 20,
            http_response_cache_ttl: Duration::from_millis(60_000),
            circuit_error_threshold: 5,
            circuit_reset: Duration::from_millis(30_000),
            circuit_window: Duration::from_millis(60_000),
            log_level: LogLevel::Info,
            log_max_days: 0,
            log_queue_limit: 1000,
            log_dir: "./logs".to_string(),
            verbose: false,
            model_provider: None,
            model_name: "gpt-4".to_string(),
            model_api_key: None,
            model_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            service_name: "qerrors".to_string(),
            error_rate_limit_per_min: 5,
            error_rate_limit_burst: 5,
            analysis_item_timeout: Duration::from_millis(30_000),
            shutdown_grace: Duration::from_millis(10_000),
            sanitiser_max_depth: 5,
            sanitiser_max_properties: 100,
            sanitiser_max_string_len: 8192,
        }
    }
}

impl Config {
    /// Load configuration from the environment, clamping every numeric
    /// value into its documented safe range.
    ///
    /// # Errors
    ///
    /// Returns [`QerrorsError::ConfigurationError`] only when
    /// `MODEL_PROVIDER` is set but `MODEL_API_KEY` is not — every other
    /// knob always has a safe default.
    pub fn from_env() -> QerrorsResult<Self> {
        let model_provider = get_optional_string("MODEL_PROVIDER");
        let model_api_key = get_optional_string("MODEL_API_KEY");

        if model_provider.is_some() && model_api_key.is_none() {
            return Err(QerrorsError::configuration_error(
                "MODEL_PROVIDER is set but MODEL_API_KEY is missing",
            ));
        }

        let config = Self {
            concurrency_limit: get_int("CONCURRENCY_LIMIT", 5, 1, 32) as u32,
            queue_limit: get_int("QUEUE_LIMIT", 200, 1, 10_000) as u32,
            cache_limit: get_int("CACHE_LIMIT", 1000, 1, 10_000) as u32,
            cache_ttl: get_duration_ms("CACHE_TTL_MS", 3_600_000, 0, u64::MAX),
            max_advice_size: get_int("MAX_ADVICE_SIZE", 524_288, 1, 16 * 1024 * 1024) as usize,
            http_timeout: get_duration_ms("HTTP_TIMEOUT_MS", 30_000, 100, 600_000),
            http_max_retries: get_int("HTTP_MAX_RETRIES", 3, 0, 10) as u32,
            http_rate_tokens_per_sec: get_int("HTTP_RATE_TOKENS_PER_SEC", 10, 1, 10_000) as u32,
            http_rate_burst: get_int("HTTP_RATE_BURST", 20, 1, 10_000) as u32,
            http_response_cache_ttl: get_duration_ms("HTTP_RESPONSE_CACHE_TTL_MS", 60_000, 0, 3_600_000),
            circuit_error_threshold: get_int("CIRCUIT_ERROR_THRESHOLD", 5, 1, 1000) as u32,
            circuit_reset: get_duration_ms("CIRCUIT_RESET_MS", 30_000, 100, 3_600_000),
            circuit_window: get_duration_ms("CIRCUIT_WINDOW_MS", 60_000, 100, 3_600_000),
            log_level: LogLevel::from_str_or_default(&get_string("LOG_LEVEL", "info")),
            log_max_days: get_int("LOG_MAX_DAYS", 0, 0, 3650) as u32,
            log_queue_limit: get_int("LOG_QUEUE_LIMIT", 1000, 1, 100_000) as u32,
            log_dir: get_string("LOG_DIR", "./logs"),
            verbose: get_bool("VERBOSE", false),
            model_provider,
            model_name: get_string("MODEL_NAME", "gpt-4"),
            model_api_key,
            model_endpoint: get_string(
                "MODEL_ENDPOINT",
                "https://api.openai.com/v1/chat/completions",
            ),
            service_name: get_string("SERVICE_NAME", "qerrors"),
            error_rate_limit_per_min: get_int("ERROR_RATE_LIMIT_PER_MIN", 5, 1, 100_000) as u32,
            error_rate_limit_burst: get_int("ERROR_RATE_LIMIT_BURST", 5, 1, 100_000) as u32,
            analysis_item_timeout: get_duration_ms("ANALYSIS_ITEM_TIMEOUT_MS", 30_000, 100, 600_000),
            shutdown_grace: get_duration_ms("SHUTDOWN_GRACE_MS", 10_000, 0, 600_000),
            sanitiser_max_depth: get_int("SANITISER_MAX_DEPTH", 5, 1, 64) as usize,
            sanitiser_max_properties: get_int("SANITISER_MAX_PROPERTIES", 100, 1, 10_000) as usize,
            sanitiser_max_string_len: get_int("SANITISER_MAX_STRING_LEN", 8192, 64, 1024 * 1024)
                as usize,
        };

        Ok(config)
    }

    /// `User-Agent` header sent to the upstream LLM endpoint.
    pub fn user_agent(&self) -> String {
        format!(
            "qerrors/{} ({})",
            env!("CARGO_PKG_VERSION"),
            self.service_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn clamps_out_of_range_concurrency_limit() {
        std::env::set_var("CONCURRENCY_LIMIT", "999");
        let config = Config::from_env().unwrap();
        assert_eq!(config.concurrency_limit, 32);
        std::env::remove_var("CONCURRENCY_LIMIT");
    }

    #[test]
    #[serial]
    fn clamps_below_minimum() {
        std::env::set_var("QUEUE_LIMIT", "0");
        let config = Config::from_env().unwrap();
        assert_eq!(config.queue_limit, 1);
        std::env::remove_var("QUEUE_LIMIT");
    }

    #[test]
    #[serial]
    fn fails_when_provider_set_without_api_key() {
        std::env::set_var("MODEL_PROVIDER", "openai");
        std::env::remove_var("MODEL_API_KEY");
        let result = Config::from_env();
        assert!(result.is_err());
        std::env::remove_var("MODEL_PROVIDER");
    }

    #[test]
    #[serial]
    fn succeeds_when_provider_and_key_both_set() {
        std::env::set_var("MODEL_PROVIDER", "openai");
        std::env::set_var("MODEL_API_KEY", "sk-test");
        let result = Config::from_env();
        assert!(result.is_ok());
        std::env::remove_var("MODEL_PROVIDER");
        std::env::remove_var("MODEL_API_KEY");
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.queue_limit, 200);
        assert_eq!(config.cache_limit, 1000);
        assert_eq!(config.max_advice_size, 524_288);
        assert_eq!(config.error_rate_limit_per_min, 5);
        assert_eq!(config.error_rate_limit_burst, 5);
    }
}
