//! Built-in filters.
//!
//! | name          | effect                                                          |
//! |---------------|-----------------------------------------------------------------|
//! | `auth`        | API-key check against a request header                          |
//! | `rate_limit`  | enforces the enabled rule of the request's rate-limit group     |
//! | `access_log`  | one log line per request, written after the rest of the chain   |
//! | `integration` | appends the backend call, or a mock reply for mocked methods    |
use std::sync::Arc;

use crate::{
    core::binder::FilterRegistry,
    ports::{backend_client::BackendClient, rate_limit_backend::RateLimitBackend},
};

pub mod access_log;
pub mod auth;
pub mod integration;
pub mod rate_limit;

pub const AUTH: &str = "auth";
pub const RATE_LIMIT: &str = "rate_limit";
pub const ACCESS_LOG: &str = "access_log";
pub const INTEGRATION: &str = "integration";

/// Host-provided collaborators the built-in filters call into.
#[derive(Clone)]
pub struct BuiltinServices {
    pub backend: Arc<dyn BackendClient>,
    pub rate_limiter: Arc<dyn RateLimitBackend>,
}

/// Register every built-in filter factory into `registry`.
pub fn register_builtin(registry: &mut FilterRegistry, services: BuiltinServices) {
    registry.register(AUTH, || Box::new(auth::ApiKeyAuthFactory::default()));
    registry.register(ACCESS_LOG, || Box::new(access_log::AccessLogFactory::default()));

    let rate_limiter = services.rate_limiter;
    registry.register(RATE_LIMIT, move || {
        Box::new(rate_limit::RateLimitFactory::new(Arc::clone(&rate_limiter)))
    });

    let backend = services.backend;
    registry.register(INTEGRATION, move || {
        Box::new(integration::IntegrationFactory::new(Arc::clone(&backend)))
    });
}

/// A registry holding only the built-in filters.
pub fn builtin_registry(services: BuiltinServices) -> FilterRegistry {
    let mut registry = FilterRegistry::new();
    register_builtin(&mut registry, services);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{GovernorRateLimitBackend, UnavailableBackendClient};

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry(BuiltinServices {
            backend: Arc::new(UnavailableBackendClient),
            rate_limiter: Arc::new(GovernorRateLimitBackend::new()),
        });
        assert_eq!(
            registry.names(),
            vec![ACCESS_LOG, AUTH, INTEGRATION, RATE_LIMIT]
        );
    }
}
