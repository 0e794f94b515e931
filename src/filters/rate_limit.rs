use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;

use crate::{
    core::{
        context::RequestContext,
        error::GatewayError,
        filter::{Filter, FilterError, FilterFactory, FilterRef},
    },
    metrics,
    ports::rate_limit_backend::{RateLimitBackend, RateLimitDecision},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitFilterConfig {
    /// Status written when a request is limited
    pub status_code: u16,
    pub message: Option<String>,
    /// Let requests through when the backend itself fails
    pub fail_open: bool,
}

impl Default for RateLimitFilterConfig {
    fn default() -> Self {
        Self {
            status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            message: None,
            fail_open: true,
        }
    }
}

pub struct RateLimitFactory {
    backend: Arc<dyn RateLimitBackend>,
    config: RateLimitFilterConfig,
}

impl RateLimitFactory {
    pub fn new(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self {
            backend,
            config: RateLimitFilterConfig::default(),
        }
    }
}

impl FilterFactory for RateLimitFactory {
    type Config = RateLimitFilterConfig;

    fn config(&mut self) -> &mut RateLimitFilterConfig {
        &mut self.config
    }

    fn apply(&self) -> Result<FilterRef, FilterError> {
        let status = StatusCode::from_u16(self.config.status_code).map_err(|e| {
            FilterError::InvalidConfig(format!(
                "invalid status_code {}: {e}",
                self.config.status_code
            ))
        })?;

        Ok(Arc::new(RateLimitFilter {
            backend: Arc::clone(&self.backend),
            status,
            message: self.config.message.clone(),
            fail_open: self.config.fail_open,
        }))
    }
}

/// Checks the request's rate-limit group against its enabled rule.
///
/// Requests outside every group, or in a group without an enabled rule, pass untouched.
pub struct RateLimitFilter {
    backend: Arc<dyn RateLimitBackend>,
    status: StatusCode,
    message: Option<String>,
    fail_open: bool,
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        super::RATE_LIMIT
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let Some(classification) = ctx.rate_limit().cloned() else {
            return Ok(());
        };
        let Some(rule) = classification.rule else {
            return Ok(());
        };
        let group = &*classification.group;

        match self.backend.check(group, &rule).await {
            Ok(RateLimitDecision::Allowed) => Ok(()),
            Ok(RateLimitDecision::Limited) => {
                tracing::info!(request_id = %ctx.id(), group, "request rate limited");
                metrics::increment_rate_limited(group);
                match &self.message {
                    Some(message) => ctx.abort_with_error(self.status, message.clone()),
                    None if self.status == StatusCode::TOO_MANY_REQUESTS => {
                        ctx.write_err(&GatewayError::RateLimited(group.to_string()))
                    }
                    None => ctx.abort_with_error(
                        self.status,
                        GatewayError::RateLimited(group.to_string()).to_string(),
                    ),
                }
                Ok(())
            }
            Err(e) if self.fail_open => {
                tracing::warn!(group, error = %e, "rate limit backend failed, letting request through");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
