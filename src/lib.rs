//! Axon dispatch - the request-dispatch core of an API gateway.
//!
//! Given an API configuration document, this crate answers three questions for every
//! incoming request, then runs it:
//!
//! - which configured method does the request address (resource tree resolution with
//!   literal segments preferred over `{param}` segments)?
//! - is that API registered and `Up` in the [`core::ApiRegistry`]?
//! - which rate-limit group, if any, does the path belong to?
//!
//! The resolved method carries a filter chain bound once at load time. The chain runs under
//! the method's timeout on a [`core::RequestContext`] that filters mutate, abort, or extend.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axon_dispatch::{
//!     adapters::{GovernorRateLimitBackend, UnavailableBackendClient},
//!     core::{ApiRegistry, DispatchService, RequestInfo},
//!     filters::{BuiltinServices, builtin_registry},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = axon_dispatch::config::load_config("api_config.yaml").await?;
//! let filters = builtin_registry(BuiltinServices {
//!     backend: Arc::new(UnavailableBackendClient),
//!     rate_limiter: Arc::new(GovernorRateLimitBackend::new()),
//! });
//! let service = DispatchService::new(
//!     Arc::new(config),
//!     Arc::new(ApiRegistry::new()),
//!     Arc::new(filters),
//! )
//! .await?;
//!
//! let request = RequestInfo::new(http::Method::GET, "/users/42".parse()?);
//! let response = service.dispatch(request).await;
//! println!("{}", response.status);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Business logic lives in `core`. The outside world is reached through **ports** (traits
//! for backend calls and rate-limit enforcement) and their **adapters**. Network listeners
//! and real backend protocols are left to the embedding application.
//!
//! # Error Handling
//! Configuration and binding problems surface as [`config::ValidationError`], collected so a
//! document reports every problem at once. Request-time failures never escape
//! `dispatch`: they become structured JSON error responses.
//!
//! # Concurrency & Data Structures
//! The registry uses `scc::HashMap` with `arc_swap` entries, and each configuration
//! generation is published through an `ArcSwap`, so reads never block behind writers.
pub mod config;
pub mod filters;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    config::{ApiConfig, ValidationError},
    core::{ApiRegistry, DispatchService, RequestContext, RequestInfo},
    ports::{backend_client::BackendClient, rate_limit_backend::RateLimitBackend},
};
