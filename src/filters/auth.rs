use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use http::{HeaderName, StatusCode};
use serde::Deserialize;

use crate::core::{
    context::RequestContext,
    error::GatewayError,
    filter::{Filter, FilterError, FilterFactory, FilterRef},
};

fn default_header() -> String {
    "x-api-key".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiKeyAuthConfig {
    /// Request header carrying the key
    #[serde(default = "default_header")]
    pub header: String,
    /// Accepted keys. At least one is required.
    pub keys: Vec<String>,
    /// Replaces the default "unauthorized" message when set
    pub message: Option<String>,
}

impl Default for ApiKeyAuthConfig {
    fn default() -> Self {
        Self {
            header: default_header(),
            keys: Vec::new(),
            message: None,
        }
    }
}

#[derive(Default)]
pub struct ApiKeyAuthFactory {
    config: ApiKeyAuthConfig,
}

impl FilterFactory for ApiKeyAuthFactory {
    type Config = ApiKeyAuthConfig;

    fn config(&mut self) -> &mut ApiKeyAuthConfig {
        &mut self.config
    }

    fn apply(&self) -> Result<FilterRef, FilterError> {
        if self.config.keys.is_empty() {
            return Err(FilterError::InvalidConfig(
                "auth requires at least one key".to_string(),
            ));
        }
        let header = HeaderName::try_from(self.config.header.as_str()).map_err(|e| {
            FilterError::InvalidConfig(format!("invalid header '{}': {e}", self.config.header))
        })?;

        Ok(Arc::new(ApiKeyAuthFilter {
            header,
            keys: self.config.keys.iter().cloned().collect(),
            message: self.config.message.clone(),
        }))
    }
}

/// Aborts with 401 unless the request carries one of the configured keys.
pub struct ApiKeyAuthFilter {
    header: HeaderName,
    keys: HashSet<String>,
    message: Option<String>,
}

#[async_trait]
impl Filter for ApiKeyAuthFilter {
    fn name(&self) -> &str {
        super::AUTH
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let presented = ctx.header(self.header.as_str());
        if presented.is_some_and(|key| self.keys.contains(key)) {
            return Ok(());
        }

        tracing::debug!(request_id = %ctx.id(), header = %self.header, "rejecting request without a valid api key");
        match &self.message {
            Some(message) => ctx.abort_with_error(StatusCode::UNAUTHORIZED, message.clone()),
            None => ctx.write_err(&GatewayError::Unauthorized),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Method, Uri};
    use serde_json::json;

    use super::*;
    use crate::core::{context::RequestInfo, filter::DynFilterFactory};

    fn build(settings: serde_json::Value) -> Result<FilterRef, FilterError> {
        let mut factory = ApiKeyAuthFactory::default();
        DynFilterFactory::populate(&mut factory, &settings)?;
        DynFilterFactory::build(&factory)
    }

    fn request(key: Option<&'static str>) -> RequestContext {
        let mut request = RequestInfo::new(Method::GET, Uri::from_static("/users"));
        if let Some(key) = key {
            request = request.with_header(
                HeaderName::from_static("x-api-key"),
                HeaderValue::from_static(key),
            );
        }
        RequestContext::new(request)
    }

    #[test]
    fn test_apply_requires_keys() {
        assert!(build(json!({})).is_err());
        assert!(build(json!({ "keys": ["k"], "header": "bad header" })).is_err());
    }

    #[tokio::test]
    async fn test_accepts_known_key() {
        let filter = build(json!({ "keys": ["secret"] })).unwrap();
        let mut ctx = request(Some("secret"));
        filter.invoke(&mut ctx).await.unwrap();
        assert!(!ctx.is_aborted());
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_key() {
        let filter = build(json!({ "keys": ["secret"] })).unwrap();

        let mut ctx = request(None);
        filter.invoke(&mut ctx).await.unwrap();
        assert!(ctx.is_aborted());
        assert_eq!(ctx.status_code(), StatusCode::UNAUTHORIZED);

        let custom = build(json!({ "keys": ["secret"], "message": "key please" })).unwrap();
        let mut ctx = request(Some("guess"));
        custom.invoke(&mut ctx).await.unwrap();
        assert_eq!(ctx.error().unwrap().message, "key please");
    }
}
