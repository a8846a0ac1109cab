//! Error severity classification, used for log level mapping, response
//! status mapping, and metrics bucketing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a caller-supplied error.
///
/// Ordered `Low < Medium < High < Critical` so callers can compare against
/// configured thresholds. Distinct from [`crate::error::ErrorSeverity`],
/// which classifies a failure inside qerrors itself rather than a caller's
/// `ErrorRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    /// An `ErrorRecord` whose severity was not supplied defaults to `high`.
    fn default() -> Self {
        Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl Severity {
    /// HTTP status code the middleware maps this severity to, absent an
    /// explicit override from the caller's error.
    pub fn default_status_code(self) -> u16 {
        match self {
            Self::Critical | Self::High => 500,
            Self::Medium | Self::Low => 400,
        }
    }

    /// Heuristic classifier used when a caller hands qerrors an error with
    /// no explicit severity: derive one from the error's kind/name.
    ///
    /// Network and upstream-style errors default to `high` (matching the
    /// ErrorRecord default); validation-shaped errors are downgraded to
    /// `medium`.
    pub fn classify(error_name: &str) -> Self {
        let lower = error_name.to_lowercase();
        if lower.contains("validation") || lower.contains("badrequest") || lower.contains("invalid")
        {
            Self::Medium
        } else if lower.contains("fatal") || lower.contains("panic") || lower.contains("oom") {
            Self::Critical
        } else {
            Self::High
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn maps_status_codes_by_severity() {
        assert_eq!(Severity::Critical.default_status_code(), 500);
        assert_eq!(Severity::High.default_status_code(), 500);
        assert_eq!(Severity::Medium.default_status_code(), 400);
        assert_eq!(Severity::Low.default_status_code(), 400);
    }

    #[test]
    fn classifies_validation_errors_as_medium() {
        assert_eq!(Severity::classify("ValidationError"), Severity::Medium);
        assert_eq!(Severity::classify("BadRequestError"), Severity::Medium);
    }

    #[test]
    fn defaults_to_high() {
        assert_eq!(Severity::default(), Severity::High);
    }
}
