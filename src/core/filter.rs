//! Filter and filter-factory contracts.
//!
//! A [`Filter`] is one link of a request's chain. Filters are produced by factories: the
//! binder fills a factory's typed configuration from the merged `filter_configs` settings and
//! calls `apply` once per distinct configuration.
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    core::context::RequestContext,
    ports::{backend_client::BackendError, rate_limit_backend::RateLimitBackendError},
};

pub type FilterRef = Arc<dyn Filter>;

/// Ordered, immutable list of filters bound to one method.
pub type FilterList = Arc<[FilterRef]>;

/// One link of the chain.
///
/// Returning `Ok(())` lets the executor continue with the next filter. A filter that wants
/// to run logic after the rest of the chain calls `ctx.next().await` itself. To stop the
/// chain, call `ctx.abort()` or `ctx.abort_with_error(..)`, or return an error.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError>;
}

/// Errors produced while building or running a filter.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FilterError {
    #[error("invalid filter configuration: {0}")]
    InvalidConfig(String),

    /// Deliberate refusal with a caller-visible status and message.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("rate limit backend failed: {0}")]
    RateLimitBackend(#[from] RateLimitBackendError),

    #[error("{0}")]
    Internal(String),
}

impl FilterError {
    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        FilterError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Status written to the response when this error aborts a chain.
    pub fn status(&self) -> StatusCode {
        match self {
            FilterError::Rejected { status, .. } => *status,
            FilterError::Backend(BackendError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            FilterError::Backend(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"message\":\"internal error\"}".to_vec())
    }
}

/// Typed filter factory.
pub trait FilterFactory: Send + Sync {
    type Config: DeserializeOwned + Default + Send + Sync;

    /// Mutable configuration, populated before [`FilterFactory::apply`].
    fn config(&mut self) -> &mut Self::Config;

    /// Build the filter from the current configuration.
    fn apply(&self) -> Result<FilterRef, FilterError>;
}

/// Object-safe view of a [`FilterFactory`], used by the filter registry.
pub trait DynFilterFactory: Send + Sync {
    /// Replace the configuration with one decoded from `value`. `null` keeps the defaults.
    fn populate(&mut self, value: &serde_json::Value) -> Result<(), FilterError>;

    fn build(&self) -> Result<FilterRef, FilterError>;
}

impl<F: FilterFactory> DynFilterFactory for F {
    fn populate(&mut self, value: &serde_json::Value) -> Result<(), FilterError> {
        if value.is_null() {
            return Ok(());
        }
        let config = <F::Config as Deserialize>::deserialize(value)
            .map_err(|e| FilterError::InvalidConfig(e.to_string()))?;
        *self.config() = config;
        Ok(())
    }

    fn build(&self) -> Result<FilterRef, FilterError> {
        self.apply()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct GreetConfig {
        greeting: String,
    }

    #[derive(Default)]
    struct GreetFactory {
        config: GreetConfig,
    }

    struct Greet(String);

    #[async_trait]
    impl Filter for Greet {
        fn name(&self) -> &str {
            &self.0
        }

        async fn invoke(&self, _ctx: &mut RequestContext) -> Result<(), FilterError> {
            Ok(())
        }
    }

    impl FilterFactory for GreetFactory {
        type Config = GreetConfig;

        fn config(&mut self) -> &mut GreetConfig {
            &mut self.config
        }

        fn apply(&self) -> Result<FilterRef, FilterError> {
            if self.config.greeting.is_empty() {
                return Err(FilterError::InvalidConfig("greeting is required".into()));
            }
            Ok(Arc::new(Greet(self.config.greeting.clone())))
        }
    }

    #[test]
    fn test_populate_then_build() {
        let mut factory: Box<dyn DynFilterFactory> = Box::new(GreetFactory::default());
        assert!(factory.build().is_err());

        factory.populate(&json!({ "greeting": "hello" })).unwrap();
        assert_eq!(factory.build().unwrap().name(), "hello");
    }

    #[test]
    fn test_populate_rejects_wrong_shape() {
        let mut factory = GreetFactory::default();
        let err = DynFilterFactory::populate(&mut factory, &json!({ "greeting": 42 }))
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidConfig(_)));
    }

    #[test]
    fn test_error_status() {
        let err = FilterError::rejected(StatusCode::UNAUTHORIZED, "unauthorized");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "unauthorized");
        assert_eq!(
            FilterError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_json() {
        let body = ErrorResponse::new("not found").to_json();
        assert_eq!(body, br#"{"message":"not found"}"#);
    }
}
