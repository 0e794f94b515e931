use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{IntegrationRequest, RequestType},
    core::context::RequestInfo,
};

/// Custom error type for backend calls
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error when the call exceeds its deadline
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when the request cannot be translated for the backend
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No client is able to speak the integration's protocol
    #[error("Unsupported integration type: {0:?}")]
    Unsupported(RequestType),
}

/// Result type alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Everything a backend client needs to perform one integration call.
pub struct BackendCall<'a> {
    pub integration: &'a IntegrationRequest,
    pub request: &'a RequestInfo,
    /// Path parameters bound during route resolution
    pub params: &'a HashMap<String, String>,
    /// Remaining budget for the call
    pub timeout: Duration,
    /// Fires when the surrounding filter chain times out
    pub cancel: CancellationToken,
}

/// Backend reply, copied into the response by the remote filter.
#[derive(Debug, Clone, Default)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// BackendClient defines the port (interface) for dubbo / HTTP integration calls
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Perform the integration call described by `call`
    ///
    /// # Returns
    /// A future that resolves to the backend's response or an error
    async fn call(&self, call: BackendCall<'_>) -> BackendResult<BackendResponse>;
}
