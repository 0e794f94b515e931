use async_trait::async_trait;

use crate::ports::backend_client::{
    BackendCall, BackendClient, BackendError, BackendResponse, BackendResult,
};

/// Backend client for hosts that have not wired a real one. Every call fails with
/// [`BackendError::Unsupported`], which the remote filter turns into 502.
///
/// Useful for dry runs such as the CLI's `resolve` command.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackendClient;

#[async_trait]
impl BackendClient for UnavailableBackendClient {
    async fn call(&self, call: BackendCall<'_>) -> BackendResult<BackendResponse> {
        Err(BackendError::Unsupported(call.integration.request_type))
    }
}
