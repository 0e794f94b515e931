//! Backend integration.
//!
//! `integration` is bound like any other filter. When it runs it appends the filter that
//! actually produces the response: a canned reply for mocked methods, otherwise a call
//! through the host's [`BackendClient`].
use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use http::{HeaderValue, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::Instrument;

use crate::{
    config::RequestType,
    core::{
        context::{RequestContext, params_of},
        filter::{Filter, FilterError, FilterFactory, FilterRef},
    },
    ports::backend_client::{BackendCall, BackendClient},
    tracing_setup,
};

/// Reply written for methods flagged `mock`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub status: u16,
    pub body: serde_json::Value,
    pub content_type: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            body: serde_json::Value::Object(Default::default()),
            content_type: "application/json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub mock: MockConfig,
}

pub struct IntegrationFactory {
    backend: Arc<dyn BackendClient>,
    config: IntegrationConfig,
}

impl IntegrationFactory {
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        Self {
            backend,
            config: IntegrationConfig::default(),
        }
    }
}

impl FilterFactory for IntegrationFactory {
    type Config = IntegrationConfig;

    fn config(&mut self) -> &mut IntegrationConfig {
        &mut self.config
    }

    fn apply(&self) -> Result<FilterRef, FilterError> {
        let mock = &self.config.mock;
        let status = StatusCode::from_u16(mock.status).map_err(|e| {
            FilterError::InvalidConfig(format!("invalid mock status {}: {e}", mock.status))
        })?;
        let content_type = HeaderValue::try_from(mock.content_type.as_str()).map_err(|e| {
            FilterError::InvalidConfig(format!(
                "invalid mock content type '{}': {e}",
                mock.content_type
            ))
        })?;
        let body = match &mock.body {
            serde_json::Value::String(text) => text.clone().into_bytes(),
            other => serde_json::to_vec(other)
                .map_err(|e| FilterError::InvalidConfig(e.to_string()))?,
        };

        Ok(Arc::new(IntegrationFilter {
            remote: Arc::new(RemoteFilter {
                backend: Arc::clone(&self.backend),
            }),
            mock: Arc::new(MockFilter {
                status,
                content_type,
                body,
            }),
        }))
    }
}

pub struct IntegrationFilter {
    remote: FilterRef,
    mock: FilterRef,
}

#[async_trait]
impl Filter for IntegrationFilter {
    fn name(&self) -> &str {
        super::INTEGRATION
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let mocked = ctx.route().is_some_and(|route| route.method.mock);
        let next = if mocked { &self.mock } else { &self.remote };
        ctx.append_filter(Arc::clone(next));
        Ok(())
    }
}

/// Calls the backend and copies its reply into the response.
pub struct RemoteFilter {
    backend: Arc<dyn BackendClient>,
}

fn request_type_name(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Dubbo => "dubbo",
        RequestType::Http => "http",
    }
}

#[async_trait]
impl Filter for RemoteFilter {
    fn name(&self) -> &str {
        "remote"
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let Some(method) = ctx.route().map(|route| Arc::clone(&route.method)) else {
            return Err(FilterError::Internal(
                "remote call without a resolved route".to_string(),
            ));
        };
        let params = params_of(ctx);
        let span = tracing_setup::create_backend_span(
            &method.api_name,
            request_type_name(method.integration.request_type),
        );
        let started = Instant::now();

        let call = BackendCall {
            integration: &method.integration,
            request: ctx.request(),
            params: &params,
            timeout: method.timeout,
            cancel: ctx.cancellation_token().clone(),
        };
        let result = self.backend.call(call).instrument(span.clone()).await;
        span.record("duration_ms", started.elapsed().as_millis() as u64);

        let response = result?;
        span.record("http.status_code", response.status.as_u16());
        ctx.set_status(response.status);
        ctx.response_headers_mut().extend(response.headers);
        ctx.set_body(&response.body);
        Ok(())
    }
}

pub struct MockFilter {
    status: StatusCode,
    content_type: HeaderValue,
    body: Vec<u8>,
}

#[async_trait]
impl Filter for MockFilter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        tracing::debug!(request_id = %ctx.id(), "serving mock response");
        ctx.response_headers_mut()
            .insert(CONTENT_TYPE, self.content_type.clone());
        ctx.set_status(self.status);
        ctx.set_body(&self.body);
        Ok(())
    }
}
