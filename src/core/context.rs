//! Per-request state threaded through a filter chain.
//!
//! A context starts `Running`. It becomes `Aborted` when a filter (or the executor) stops
//! the chain, and `Completed` when the chain runs out of filters without an abort. Once
//! aborted, `next` does nothing and no further filter runs.
use std::{collections::HashMap, net::IpAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{
    api::Api,
    chain,
    error::GatewayError,
    filter::{ErrorResponse, FilterRef},
    rate_limit::Classification,
    resource::RouteMatch,
};

/// Header carrying the calling application's name.
pub const APPLICATION_NAME_HEADER: &str = "x-application-name";

/// The inbound request as seen by the dispatch core.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Address of the peer that sent the request
    pub remote_addr: Option<IpAddr>,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Final response of a dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Set when the chain aborted with an error. `body` then holds its JSON form.
    pub error: Option<ErrorResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Running,
    Aborted,
    Completed,
}

pub struct RequestContext {
    id: Uuid,
    request: RequestInfo,
    api: Option<Arc<Api>>,
    route: Option<RouteMatch>,
    rate_limit: Option<Classification>,

    status: StatusCode,
    response_headers: HeaderMap,
    body: BytesMut,
    error: Option<ErrorResponse>,

    state: ChainState,
    filters: Vec<FilterRef>,
    /// Index of the next filter to run.
    cursor: usize,
    /// Where `append_filter` inserts. Moves past each appended filter.
    insert_at: usize,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(request: RequestInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            api: None,
            route: None,
            rate_limit: None,
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            body: BytesMut::new(),
            error: None,
            state: ChainState::Running,
            filters: Vec::new(),
            cursor: 0,
            insert_at: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind the filter list for this request and rewind to its start.
    pub fn build_filters(&mut self, filters: impl IntoIterator<Item = FilterRef>) {
        self.filters = filters.into_iter().collect();
        self.cursor = 0;
        self.insert_at = 0;
    }

    /// Run the remaining filters in order until the list is exhausted or the chain aborts.
    ///
    /// A filter may await this to wrap logic around the rest of the chain. Calling it after
    /// an abort, or after the list ran out, does nothing.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            while self.state == ChainState::Running && self.cursor < self.filters.len() {
                let filter = Arc::clone(&self.filters[self.cursor]);
                self.cursor += 1;
                self.insert_at = self.cursor;
                chain::invoke_guarded(filter.as_ref(), self).await;
            }
        })
    }

    /// Schedule `filter` to run right after the currently running filter (and after any
    /// filters it already appended).
    pub fn append_filter(&mut self, filter: FilterRef) {
        let at = self.insert_at.max(self.cursor).min(self.filters.len());
        self.filters.insert(at, filter);
        self.insert_at = at + 1;
    }

    /// Stop the chain without an error payload.
    pub fn abort(&mut self) {
        if self.state == ChainState::Running {
            self.state = ChainState::Aborted;
        }
    }

    /// Stop the chain with `status` and a structured error body. Only the first error
    /// payload is kept.
    pub fn abort_with_error(&mut self, status: StatusCode, message: impl Into<String>) {
        if self.error.is_none() {
            self.status = status;
            self.error = Some(ErrorResponse::new(message));
        }
        self.state = ChainState::Aborted;
    }

    /// [`RequestContext::abort_with_error`] with the status and message of `err`.
    pub fn write_err(&mut self, err: &GatewayError) {
        self.abort_with_error(err.status_code(), err.to_string());
    }

    /// Mark a chain that ran out of filters as completed.
    pub(crate) fn finish(&mut self) -> ChainState {
        if self.state == ChainState::Running {
            self.state = ChainState::Completed;
        }
        self.state
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_aborted(&self) -> bool {
        self.state == ChainState::Aborted
    }

    pub fn error(&self) -> Option<&ErrorResponse> {
        self.error.as_ref()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn url(&self) -> String {
        self.request.uri.to_string()
    }

    /// Request header value, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn request_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.request.headers
    }

    /// First `X-Forwarded-For` hop, falling back to the peer address.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .and_then(|hop| hop.trim().parse().ok())
            .or(self.request.remote_addr)
    }

    /// Calling application: the `X-Application-Name` header, else the matched API's name.
    pub fn application_name(&self) -> String {
        match self.header(APPLICATION_NAME_HEADER) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .api
                .as_ref()
                .map(|api| api.name.clone())
                .unwrap_or_default(),
        }
    }

    pub fn api(&self) -> Option<&Arc<Api>> {
        self.api.as_ref()
    }

    pub fn set_api(&mut self, api: Arc<Api>) {
        self.api = Some(api);
    }

    pub fn route(&self) -> Option<&RouteMatch> {
        self.route.as_ref()
    }

    pub(crate) fn set_route(&mut self, route: RouteMatch) {
        self.route = Some(route);
    }

    /// Bound path parameter.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.route.as_ref().and_then(|route| route.param(name))
    }

    pub fn rate_limit(&self) -> Option<&Classification> {
        self.rate_limit.as_ref()
    }

    pub(crate) fn set_rate_limit(&mut self, classification: Option<Classification>) {
        self.rate_limit = classification;
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Append a response header.
    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.append(name, value);
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Append to the response body. Returns the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.body.extend_from_slice(data);
        data.len()
    }

    pub fn write_with_status(&mut self, status: StatusCode, data: &[u8]) -> usize {
        self.status = status;
        self.write(data)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace the response body.
    pub fn set_body(&mut self, body: impl AsRef<[u8]>) {
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
    }

    pub fn into_response(mut self) -> DispatchResponse {
        let body = match &self.error {
            Some(error) => {
                self.response_headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                Bytes::from(error.to_json())
            }
            None => self.body.freeze(),
        };
        DispatchResponse {
            status: self.status,
            headers: self.response_headers,
            body,
            error: self.error,
        }
    }
}

/// Path parameters as an owned map, for handing to backend clients.
pub(crate) fn params_of(ctx: &RequestContext) -> HashMap<String, String> {
    ctx.route()
        .map(|route| route.params.clone())
        .unwrap_or_default()
}
