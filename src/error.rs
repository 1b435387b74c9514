//! Shared error conventions.
//!
//! Every component owns its own `thiserror` enum; this trait gives each one a
//! grepable code and a retry hint so callers can log and branch uniformly.

/// Grepable error code plus retry classification.
pub trait ErrorCode {
    /// Stable `E_*` identifier for logs.
    fn error_code(&self) -> &'static str;

    /// Whether a caller may retry the failed operation as-is.
    fn retryable(&self) -> bool {
        false
    }
}
