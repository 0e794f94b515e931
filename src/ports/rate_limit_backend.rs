use async_trait::async_trait;
use thiserror::Error;

use crate::config::RateLimitRule;

/// Custom error type for rate-limit enforcement
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RateLimitBackendError {
    /// The opaque rule payload could not be understood by the backend
    #[error("Invalid rule for group '{group}': {message}")]
    InvalidRule { group: String, message: String },

    /// The backend could not reach its state store
    #[error("Rate limit backend unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// RateLimitBackend enforces a group's rule. The rule payload is passed through untouched.
#[async_trait]
pub trait RateLimitBackend: Send + Sync + 'static {
    /// Count one request against `group` under `rule`
    async fn check(
        &self,
        group: &str,
        rule: &RateLimitRule,
    ) -> Result<RateLimitDecision, RateLimitBackendError>;
}
