//! Internal diagnostics logging for qerrors.
//!
//! Re-exports tracing macros with log_* naming convention for consistency.
//! This is the crate's *own* logging of its own behavior — distinct from
//! [`crate::structured_logger`], which is the product feature that logs
//! caller-supplied `ErrorRecord`s.

// Re-export tracing macros with log_* naming
// Allow unused - these are available for internal use as needed
#[allow(unused_imports)]
pub use tracing::{
    debug as log_debug, error as log_error, info as log_info, trace as log_trace, warn as log_warn,
};
