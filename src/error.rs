//! Error taxonomy for the generation pipeline
//!
//! The retry/fallback orchestrator branches on these variants, so the
//! classification matters more than the message text:
//!
//! - `Validation`: caller input was malformed or oversized. Terminal,
//!   never retried.
//! - `Transient`: network/rate-limit/server trouble. Retried up to the
//!   configured attempt count, then the fallback model gets one shot.
//! - `Parse`: the model returned something we couldn't use. Recovered
//!   locally with deterministic fallback groups, never surfaced.
//! - `Cache`: durable-tier read/write trouble. Degrades to a miss/no-op.
//!
//! Variants carry owned strings and derive `Clone` so a batched request
//! can hand the identical failure to every caller sharing it.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    /// Malformed or oversized input. Terminal, never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Network, rate-limit, or upstream server failure. Retryable.
    #[error("upstream failure: {0}")]
    Transient(String),

    /// Model output could not be parsed into the expected shape.
    #[error("unparseable model output: {0}")]
    Parse(String),

    /// Durable cache tier failure. Always recovered locally.
    #[error("cache error: {0}")]
    Cache(String),

    /// The computed request budget elapsed before the upstream call finished.
    #[error("request timed out after {0}s")]
    Timeout(u64),
}

impl GenerateError {
    /// Whether the retry orchestrator may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerateError::Transient(_) | GenerateError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, GenerateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        assert!(GenerateError::Transient("503".into()).is_retryable());
        assert!(GenerateError::Timeout(30).is_retryable());
    }

    #[test]
    fn test_validation_is_terminal() {
        assert!(!GenerateError::Validation("too big".into()).is_retryable());
        assert!(!GenerateError::Parse("no json".into()).is_retryable());
        assert!(!GenerateError::Cache("enoent".into()).is_retryable());
    }
}
