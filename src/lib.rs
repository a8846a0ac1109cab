//! # qerrors
//!
//! Intelligent error-analysis middleware: fingerprints exceptions,
//! memoises LLM-generated remediation advice, and ships a bounded,
//! self-protecting ingest pipeline behind a framework-agnostic entry
//! point.
//!
//! ## Example
//!
//! ```rust,no_run
//! use qerrors::engine::QerrorsEngine;
//! use qerrors::middleware::CapturedError;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = QerrorsEngine::from_env()?;
//! let error = CapturedError::new("DBError", "connection refused");
//! engine.handle_error(error, None).await;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module declarations
// =============================================================================

pub mod advice;
pub mod circuit_breaker;
pub mod collections;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod http_client;
pub mod http_surface;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod queue;
pub mod rate_limiter;
pub mod record;
pub mod request_cache;
pub mod sanitiser;
pub mod severity;
pub mod structured_logger;

pub(crate) mod logging;

// =============================================================================
// Public API re-exports
// =============================================================================

pub use config::Config;
pub use engine::QerrorsEngine;
pub use error::{QerrorsError, QerrorsResult};
pub use fingerprint::Fingerprint;
pub use metrics::{HealthSnapshot, Metrics, MetricsSnapshot};
pub use middleware::{CapturedError, HttpErrorContext, MiddlewareResponse, QerrorsMiddleware};
pub use record::{Advice, ErrorRecord, Remediation};
pub use severity::Severity;
