//! Error taxonomy for qerrors.
//!
//! [`QerrorsError`] covers every failure mode a caller of this crate can see.
//! Internally, components convert between this type and metrics/fallback
//! advice — the public middleware itself never propagates an error to its
//! caller.

use crate::logging::{log_error, log_warn};
use thiserror::Error;

/// High-level categorization used for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller supplied something we can't act on (bad config, bad input).
    Client,
    /// The upstream LLM endpoint failed or returned something unusable.
    Upstream,
    /// Self-protection kicked in: rate limit or circuit breaker.
    SelfProtection,
    /// A bug inside qerrors itself.
    Internal,
}

/// Severity used for logging and alerting decisions about a *qerrors*
/// internal failure (not to be confused with [`crate::record::Severity`],
/// which classifies a caller's `ErrorRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

/// Convenient result alias used throughout the crate.
pub type QerrorsResult<T> = std::result::Result<T, QerrorsError>;

/// Errors produced by qerrors components.
#[derive(Error, Debug)]
pub enum QerrorsError {
    /// Startup configuration is invalid (e.g. a provider configured without
    /// an API key, or a malformed endpoint URL).
    #[error("configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },

    /// Input the caller handed us couldn't be processed (e.g. the sanitiser
    /// was asked to walk a cyclic graph it could not make sense of).
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The HTTP request to the LLM endpoint failed at the transport level.
    #[error("upstream request failed: {message}")]
    Upstream {
        /// Description of the failure.
        message: String,
        /// The underlying transport error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The upstream endpoint responded with a non-2xx status.
    #[error("upstream returned status {status}")]
    UpstreamStatus {
        /// The HTTP status code returned.
        status: u16,
    },

    /// The upstream response body could not be parsed into advice.
    #[error("failed to parse upstream response: {message}")]
    ParseError {
        /// Details about the parsing failure.
        message: String,
    },

    /// The token bucket had no tokens available within the configured grace
    /// period.
    #[error("rate limited")]
    RateLimited,

    /// The circuit breaker for the upstream endpoint is open.
    #[error("circuit open until {open_until_epoch_ms}")]
    CircuitOpen {
        /// Epoch milliseconds at which the breaker will move to half-open.
        open_until_epoch_ms: u64,
    },

    /// The operation exceeded its deadline.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The caller (or a shutdown) cancelled the operation before it
    /// completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Something qerrors itself should not have let happen.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the invariant that was violated.
        message: String,
    },
}

impl QerrorsError {
    /// Category for routing/handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigurationError { .. } | Self::Validation { .. } => ErrorCategory::Client,
            Self::Upstream { .. } | Self::UpstreamStatus { .. } | Self::ParseError { .. } => {
                ErrorCategory::Upstream
            }
            Self::RateLimited | Self::CircuitOpen { .. } => ErrorCategory::SelfProtection,
            Self::Timeout { .. } | Self::Cancelled | Self::Internal { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Severity for logging/alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConfigurationError { .. } | Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Upstream { .. } | Self::UpstreamStatus { .. } => ErrorSeverity::Error,
            Self::Validation { .. } | Self::ParseError { .. } => ErrorSeverity::Warning,
            Self::RateLimited | Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } | Self::Cancelled => ErrorSeverity::Info,
        }
    }

    /// Whether the HTTP client's retry loop should retry after this error:
    /// network errors and upstream statuses in {429, 500, 502, 503, 504}
    /// retry; everything else doesn't.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { .. } | Self::Timeout { .. } => true,
            Self::UpstreamStatus { status } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "configuration_error", message = %message, "qerrors configuration invalid");
        Self::ConfigurationError { message }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "validation", message = %message, "qerrors validation failed");
        Self::Validation { message }
    }

    pub fn upstream(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(error_type = "upstream", message = %message, has_source = source.is_some(), "upstream request failed");
        Self::Upstream { message, source }
    }

    pub fn upstream_status(status: u16) -> Self {
        log_warn!(error_type = "upstream_status", status = status, "upstream returned error status");
        Self::UpstreamStatus { status }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "parse_error", message = %message, "failed to parse upstream response");
        Self::ParseError { message }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        log_warn!(error_type = "timeout", timeout_ms = timeout_ms, "operation timed out");
        Self::Timeout { timeout_ms }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "internal", message = %message, "internal invariant violated");
        Self::Internal { message }
    }

    /// A message safe to surface to an external caller: client and
    /// self-protection errors describe themselves; upstream/internal
    /// failures collapse to a generic message so transport errors, stack
    /// traces, and upstream response bodies never leak past this crate's
    /// boundary.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Client | ErrorCategory::SelfProtection => self.to_string(),
            ErrorCategory::Upstream | ErrorCategory::Internal => {
                "an internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_upstream_statuses_cover_429_and_5xx() {
        for status in [429, 500, 502, 503, 504] {
            assert!(QerrorsError::upstream_status(status).is_retryable());
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!QerrorsError::upstream_status(status).is_retryable());
        }
    }

    #[test]
    fn rate_limited_and_circuit_open_are_self_protection() {
        assert_eq!(QerrorsError::RateLimited.category(), ErrorCategory::SelfProtection);
        assert_eq!(
            QerrorsError::CircuitOpen { open_until_epoch_ms: 0 }.category(),
            ErrorCategory::SelfProtection
        );
    }

    #[test]
    fn cancelled_and_timeout_are_not_retryable() {
        assert!(!QerrorsError::Cancelled.is_retryable());
        assert!(!QerrorsError::timeout(30_000).is_retryable());
    }

    #[test]
    fn user_message_hides_upstream_and_internal_details() {
        let upstream = QerrorsError::upstream("connection reset by peer", None);
        assert_eq!(upstream.user_message(), "an internal error occurred");

        let internal = QerrorsError::internal("invariant X violated");
        assert_eq!(internal.user_message(), "an internal error occurred");
    }

    #[test]
    fn user_message_passes_through_client_and_self_protection_errors() {
        let validation = QerrorsError::validation("missing field `name`");
        assert_eq!(validation.user_message(), validation.to_string());

        assert_eq!(QerrorsError::RateLimited.user_message(), "rate limited");
    }
}
