use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::core::api::ApiStatus;

/// Outcomes that end a dispatch early with an error response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("api '{0}' is not registered")]
    ApiNotFound(String),

    #[error("api '{name}' is unavailable (status: {status})")]
    ServiceUnavailable { name: String, status: ApiStatus },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limit exceeded for '{0}'")]
    RateLimited(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } | GatewayError::ApiNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = GatewayError::RouteNotFound {
            method: "GET".into(),
            path: "/x".into(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.to_string(), "no route for GET /x");

        let down = GatewayError::ServiceUnavailable {
            name: "GET /x".into(),
            status: ApiStatus::Down,
        };
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::Timeout(Duration::from_millis(5)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
