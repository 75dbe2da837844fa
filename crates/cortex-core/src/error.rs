// Error taxonomy for Cortex (spec.md section 7)
//
// Every fallible operation in the pipeline returns a `CortexError`. The
// variants are semantic, not transport-specific: callers (HTTP handlers,
// the Runtime retry loop) map a variant to a status code or a retry decision
// via `kind()` / `is_retryable()` rather than matching on the variant
// itself, so a new call site never has to duplicate the policy.

use thiserror::Error;

/// Result type alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, CortexError>;

/// The six semantic error kinds from spec.md section 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input from a user or caller. Never retried.
    Validation,
    /// A referenced entity (connection, unit, run) does not exist.
    ResourceMissing,
    /// Network error, 5xx, or 429 with retry-after. Retried within budget.
    Transient,
    /// 4xx other than 429, schema violation, revoked auth. Fails immediately.
    Permanent,
    /// Duplicate dedup key or Run. Not an error, collapsed to "duplicate".
    Conflict,
    /// An invariant was violated (e.g. an action references an undefined tool).
    Internal,
}

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("resource missing: {0}")]
    ResourceMissing(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CortexError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CortexError::Validation(msg.into())
    }

    pub fn resource_missing(msg: impl Into<String>) -> Self {
        CortexError::ResourceMissing(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CortexError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        CortexError::Permanent(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CortexError::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CortexError::Internal(msg.into())
    }

    /// Semantic kind, used to decide retry/HTTP-status policy without
    /// matching on the variant at every call site.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CortexError::Validation(_) => ErrorKind::Validation,
            CortexError::ResourceMissing(_) => ErrorKind::ResourceMissing,
            CortexError::Transient(_) => ErrorKind::Transient,
            CortexError::Permanent(_) => ErrorKind::Permanent,
            CortexError::Conflict(_) => ErrorKind::Conflict,
            CortexError::Internal(_) | CortexError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is eligible for retry under a `RetryPolicy`.
    /// Only `Transient` errors are retried; everything else is a terminal
    /// outcome for the current attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(CortexError::transient("timeout").is_retryable());
        assert!(!CortexError::permanent("bad request").is_retryable());
        assert!(!CortexError::validation("bad field").is_retryable());
        assert!(!CortexError::conflict("dup").is_retryable());
        assert!(!CortexError::internal("bug").is_retryable());
        assert!(!CortexError::resource_missing("no unit").is_retryable());
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(CortexError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            CortexError::resource_missing("x").kind(),
            ErrorKind::ResourceMissing
        );
        assert_eq!(CortexError::transient("x").kind(), ErrorKind::Transient);
        assert_eq!(CortexError::permanent("x").kind(), ErrorKind::Permanent);
        assert_eq!(CortexError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(CortexError::internal("x").kind(), ErrorKind::Internal);
    }
}
