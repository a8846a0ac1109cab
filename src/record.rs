//! Core data model: `ErrorRecord`, `Advice`, `LogEntry`.

use crate::config::LogLevel;
use crate::fingerprint::Fingerprint;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An immutable, sanitised snapshot of a caught exception plus its request
/// context.
///
/// Constructed once by the middleware and never mutated afterwards;
/// the fingerprint is computed at construction and carried on the value so
/// downstream components never recompute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub name: String,
    pub message: String,
    pub stack: Vec<String>,
    pub severity: Severity,
    pub request_id: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

impl ErrorRecord {
    /// Build a record from already-sanitised fields, computing the
    /// fingerprint from `name`/`message`/`stack`.
    ///
    /// Callers go through [`crate::middleware`] rather than this
    /// constructor directly so sanitisation and severity defaulting always
    /// happen first.
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: Vec<String>,
        severity: Severity,
        request_id: Option<String>,
        context: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        let name = name.into();
        let message = message.into();
        let fingerprint = Fingerprint::compute(&name, &message, &stack);
        Self {
            name,
            message,
            stack,
            severity,
            request_id,
            context,
            timestamp: Utc::now(),
            fingerprint,
        }
    }

    /// The JSON payload sent to the LLM as the `user` message content —
    /// the whole record, sanitised, serialised.
    pub fn to_llm_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "message": self.message,
            "stack": self.stack,
            "severity": self.severity,
            "requestId": self.request_id,
            "context": self.context,
        })
    }
}

/// Either a single remediation sentence or an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Remediation {
    Single(String),
    Steps(Vec<String>),
}

/// LLM-generated diagnosis + remediation pair, keyed by fingerprint in the
/// advice cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advice {
    pub diagnosis: String,
    pub remediation: Remediation,
    pub confidence: Option<f64>,
    pub generated_at: DateTime<Utc>,
    pub serialized_bytes: usize,
}

impl Advice {
    /// Build advice from a parsed upstream response, computing
    /// `serialized_bytes` from the serialised JSON representation so the
    /// cache's byte budget is charged accurately.
    pub fn new(diagnosis: impl Into<String>, remediation: Remediation, confidence: Option<f64>) -> Self {
        let diagnosis = diagnosis.into();
        let generated_at = Utc::now();
        let serialized_bytes = serde_json::to_vec(&serde_json::json!({
            "diagnosis": diagnosis,
            "remediation": &remediation,
            "confidence": confidence,
        }))
        .map(|bytes| bytes.len())
        .unwrap_or(0);

        Self {
            diagnosis,
            remediation,
            confidence,
            generated_at,
            serialized_bytes,
        }
    }

    /// The synthetic advice returned when analysis is unavailable
    /// (`CircuitOpen`/`RateLimited`/upstream/parse failure). Never cached.
    pub fn fallback_stub() -> Self {
        Self {
            diagnosis: "analysis unavailable".to_string(),
            remediation: Remediation::Single("see logs".to_string()),
            confidence: None,
            generated_at: Utc::now(),
            serialized_bytes: 0,
        }
    }

    pub fn exceeds_size_limit(&self, max_advice_size: usize) -> bool {
        self.serialized_bytes > max_advice_size
    }
}

/// A single structured log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "lvl")]
    pub level: LogLevel,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        meta: Option<HashMap<String, serde_json::Value>>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            meta,
            request_id,
        }
    }

    /// Render as a single JSON line. Falls back to a placeholder line
    /// instead of failing — logging never throws.
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            Err(_) => format!(
                "{{\"ts\":\"{}\",\"lvl\":\"{:?}\",\"msg\":\"[unserialisable log entry]\"}}",
                self.timestamp, self.level
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_record_carries_computed_fingerprint() {
        let record = ErrorRecord::new("DBError", "conn refused", vec![], Severity::High, None, None);
        let expected = Fingerprint::compute("DBError", "conn refused", &[]);
        assert_eq!(record.fingerprint, expected);
    }

    #[test]
    fn fallback_stub_is_never_oversize() {
        let stub = Advice::fallback_stub();
        assert!(!stub.exceeds_size_limit(1));
    }

    #[test]
    fn advice_rejects_when_oversize() {
        let advice = Advice::new(
            "x".repeat(1000),
            Remediation::Single("y".repeat(1000)),
            None,
        );
        assert!(advice.exceeds_size_limit(10));
        assert!(!advice.exceeds_size_limit(1_000_000));
    }

    #[test]
    fn log_entry_serialises_to_single_json_line() {
        let entry = LogEntry::new(LogLevel::Info, "hello", None, None);
        let line = entry.to_json_line();
        assert!(line.contains("\"msg\":\"hello\""));
        assert!(!line.contains('\n'));
    }
}
