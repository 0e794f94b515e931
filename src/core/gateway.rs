//! Core dispatch orchestration.
//!
//! A [`RouteTable`] is one immutable configuration generation: the resource tree with every
//! filter chain already bound, plus the compiled rate-limit matcher. [`DispatchService`]
//! publishes the current generation through an `ArcSwap`, so a reload is one pointer swap
//! and in-flight requests finish on the generation they started with.
//!
//! Per request: resolve the route, confirm the API is registered and `Up`, classify the
//! path for rate limiting, then run the chain under the method's timeout.
use std::{collections::HashSet, sync::Arc, time::Instant};

use arc_swap::ArcSwap;
use http::{HeaderName, HeaderValue};
use tracing::Instrument;

use crate::{
    config::{
        ApiConfig, HttpVerb,
        validation::{ApiConfigValidator, ValidationResult},
    },
    core::{
        api::Api,
        binder::{FilterBinder, FilterRegistry},
        chain::FilterChainExecutor,
        context::{ChainState, DispatchResponse, RequestContext, RequestInfo},
        error::GatewayError,
        rate_limit::{Classification, RateLimitMatcher},
        registry::ApiRegistry,
        resource::{Resolution, ResourceTree, RouteMatch, decode_path},
    },
    metrics, tracing_setup,
};

/// One configuration generation, immutable once built.
pub struct RouteTable {
    config: Arc<ApiConfig>,
    tree: ResourceTree,
    matcher: RateLimitMatcher,
    api_names: Vec<String>,
}

impl RouteTable {
    /// Validate `config`, build the tree, bind every chain and compile the rate-limit groups.
    pub fn build(config: Arc<ApiConfig>, filters: &FilterRegistry) -> ValidationResult<Self> {
        ApiConfigValidator::validate(&config)?;

        let mut binder = FilterBinder::new(filters, &config);
        let tree = ResourceTree::build(&config, &mut binder)?;
        let matcher = RateLimitMatcher::compile(&config.rate_limit)?;
        tracing::debug!(filters = binder.built_count(), "bound filter chains");

        let api_names = tree
            .methods()
            .iter()
            .map(|method| method.api_name.clone())
            .collect();

        Ok(Self {
            config,
            tree,
            matcher,
            api_names,
        })
    }

    pub fn config(&self) -> &Arc<ApiConfig> {
        &self.config
    }

    pub fn resolve(&self, path: &str, verb: HttpVerb) -> Resolution {
        self.tree.resolve(path, verb)
    }

    /// Classify a raw request path. Patterns see the percent-decoded path, the same form
    /// route resolution matches against.
    pub fn classify(&self, path: &str) -> Option<Classification> {
        self.matcher.classify(&decode_path(path))
    }

    /// Descriptors for every enabled method, all `Up`.
    pub fn apis(&self) -> Vec<Api> {
        self.tree
            .methods()
            .iter()
            .map(|method| method.to_api())
            .collect()
    }

    pub fn api_names(&self) -> &[String] {
        &self.api_names
    }
}

/// Entry point for dispatching requests.
///
/// Construct with [`DispatchService::new`], passing the registry explicitly so liveness
/// can be driven from outside (health checks, admin tooling).
pub struct DispatchService {
    table: ArcSwap<RouteTable>,
    registry: Arc<ApiRegistry>,
    filters: Arc<FilterRegistry>,
}

impl DispatchService {
    /// Build the first generation and register its APIs as `Up`.
    pub async fn new(
        config: Arc<ApiConfig>,
        registry: Arc<ApiRegistry>,
        filters: Arc<FilterRegistry>,
    ) -> ValidationResult<Self> {
        let table = RouteTable::build(config, &filters)?;
        for api in table.apis() {
            registry.register(api).await;
        }
        tracing::info!(apis = table.api_names().len(), "dispatch service ready");

        Ok(Self {
            table: ArcSwap::from_pointee(table),
            registry,
            filters,
        })
    }

    pub fn registry(&self) -> &Arc<ApiRegistry> {
        &self.registry
    }

    /// Current generation.
    pub fn route_table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Swap in a new generation. On error the current one stays in place untouched.
    ///
    /// APIs present before keep their status, new ones start `Up`, and APIs the previous
    /// generation registered but the new one lacks are deregistered.
    pub async fn reload(&self, config: Arc<ApiConfig>) -> ValidationResult<()> {
        let next = match RouteTable::build(config, &self.filters) {
            Ok(table) => table,
            Err(e) => {
                tracing::error!(error = %e, "configuration reload rejected");
                return Err(e);
            }
        };

        for api in next.apis() {
            self.registry.refresh(api).await;
        }

        let previous = self.table.swap(Arc::new(next));
        let current = self.table.load_full();
        let keep: HashSet<&str> = current.api_names().iter().map(String::as_str).collect();
        self.registry
            .deregister_missing(previous.api_names(), &keep)
            .await;

        tracing::info!(apis = keep.len(), "configuration reloaded");
        Ok(())
    }

    /// Dispatch one request through its resolved filter chain.
    pub async fn dispatch(&self, request: RequestInfo) -> DispatchResponse {
        let ctx = RequestContext::new(request);
        let span = tracing_setup::create_request_span(
            ctx.method().as_str(),
            ctx.path(),
            &ctx.id().to_string(),
        );
        let started = Instant::now();

        async move {
            let (outcome, response) = self.run(ctx).await;
            let span = tracing::Span::current();
            span.record("http.status_code", response.status.as_u16());
            span.record("duration_ms", started.elapsed().as_millis() as u64);
            metrics::increment_request_total(outcome, response.status.as_u16());
            tracing::debug!(outcome, status = response.status.as_u16(), "dispatch finished");
            response
        }
        .instrument(span)
        .await
    }

    async fn run(&self, mut ctx: RequestContext) -> (&'static str, DispatchResponse) {
        let table = self.table.load_full();
        let verb = HttpVerb::from(ctx.method());
        let path = ctx.path().to_string();

        let route = match table.resolve(&path, verb) {
            Resolution::Matched(route) => route,
            Resolution::MethodNotAllowed { path } => {
                ctx.write_err(&GatewayError::MethodNotAllowed {
                    method: ctx.method().to_string(),
                    path,
                });
                return ("method_not_allowed", ctx.into_response());
            }
            Resolution::NotFound => {
                ctx.write_err(&GatewayError::RouteNotFound {
                    method: ctx.method().to_string(),
                    path,
                });
                return ("not_found", ctx.into_response());
            }
        };
        tracing::Span::current().record("api.name", route.api_name());

        let Some(api) = self.registry.find(route.api_name()).await else {
            tracing::warn!(api = route.api_name(), "resolved api is not registered");
            ctx.write_err(&GatewayError::ApiNotFound(route.api_name().to_string()));
            return ("not_found", ctx.into_response());
        };
        if !api.is_up() {
            tracing::warn!(api = %api.name, status = %api.status, "refusing request for unavailable api");
            ctx.write_err(&GatewayError::ServiceUnavailable {
                name: api.name.clone(),
                status: api.status,
            });
            return ("unavailable", ctx.into_response());
        }

        let classification = table.classify(&path);
        if let Some(classification) = &classification {
            metrics::increment_rate_limit_classification(&classification.group);
        }
        tracing::debug!(
            api = %api.name,
            rate_limit_group = classification.as_ref().map(|c| &*c.group),
            "route resolved"
        );

        let timeout = route.method.timeout;
        let api_name = api.name.clone();
        Self::apply_static_headers(&mut ctx, &route);
        ctx.set_api(api);
        ctx.set_rate_limit(classification);
        ctx.build_filters(route.filters().iter().cloned());
        ctx.set_route(route);

        let state = {
            let _timer = metrics::ChainTimer::new(&api_name);
            FilterChainExecutor::run(&mut ctx, timeout).await
        };
        let outcome = match state {
            ChainState::Completed => "completed",
            ChainState::Aborted if ctx.error().is_some() => "error",
            _ => "aborted",
        };
        (outcome, ctx.into_response())
    }

    /// Copy the matched resources' static headers onto the response, root first.
    fn apply_static_headers(ctx: &mut RequestContext, route: &RouteMatch) {
        for resource in &route.resources {
            for (name, value) in &resource.headers {
                match (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::try_from(value.as_str()),
                ) {
                    (Ok(name), Ok(value)) => {
                        ctx.response_headers_mut().insert(name, value);
                    }
                    _ => tracing::warn!(header = %name, resource = %resource.full_path, "skipping invalid static header"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri};

    use super::*;
    use crate::config::{MatchStrategy, Method as ConfigMethod, RateLimitResource, Resource};

    fn config() -> Arc<ApiConfig> {
        Arc::new(
            ApiConfig::builder()
                .resource(
                    Resource::new("/users")
                        .with_method(ConfigMethod::new(HttpVerb::Get))
                        .with_child(Resource::new("/{id}").with_method(ConfigMethod::new(HttpVerb::Get))),
                )
                .build()
                .unwrap(),
        )
    }

    async fn service() -> DispatchService {
        DispatchService::new(
            config(),
            Arc::new(ApiRegistry::new()),
            Arc::new(FilterRegistry::new()),
        )
        .await
        .unwrap()
    }

    fn get(path: &'static str) -> RequestInfo {
        RequestInfo::new(Method::GET, Uri::from_static(path))
    }

    #[tokio::test]
    async fn test_registers_apis_up() {
        let service = service().await;
        assert_eq!(
            service.registry().names().await,
            vec!["GET /users", "GET /users/{id}"]
        );
        assert!(service.registry().is_up("GET /users/{id}").await);
    }

    #[tokio::test]
    async fn test_empty_chain_completes_with_200() {
        let service = service().await;
        let response = service.dispatch(get("/users/7")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_resolution_misses() {
        let service = service().await;
        let response = service.dispatch(get("/nothing")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let response = service
            .dispatch(RequestInfo::new(Method::DELETE, Uri::from_static("/users")))
            .await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_down_and_deregistered_api() {
        let service = service().await;
        service.registry().offline("GET /users").await;
        let response = service.dispatch(get("/users")).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);

        service.registry().deregister("GET /users").await;
        let response = service.dispatch(get("/users")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_headers_are_applied() {
        let mut resource = Resource::new("/ping").with_method(ConfigMethod::new(HttpVerb::Get));
        resource
            .headers
            .insert("x-served-by".to_string(), "dispatch".to_string());
        let config = Arc::new(ApiConfig::builder().resource(resource).build().unwrap());
        let service = DispatchService::new(
            config,
            Arc::new(ApiRegistry::new()),
            Arc::new(FilterRegistry::new()),
        )
        .await
        .unwrap();

        let response = service.dispatch(get("/ping")).await;
        assert_eq!(response.headers["x-served-by"], "dispatch");
    }

    #[test]
    fn test_classification_sees_decoded_path() {
        let mut config = (*config()).clone();
        config.rate_limit.resources = vec![
            RateLimitResource::new("spaced").with_item(MatchStrategy::Exact, "/users/a b"),
            RateLimitResource::new("users").with_item(MatchStrategy::Regex, "/users/\\w+"),
        ];
        let table = RouteTable::build(Arc::new(config), &FilterRegistry::new()).unwrap();

        assert_eq!(&*table.classify("/users/a%20b").unwrap().group, "spaced");
        assert_eq!(&*table.classify("/users/a b").unwrap().group, "spaced");
        assert_eq!(&*table.classify("/users/%6Aoe").unwrap().group, "users");
        assert!(table.classify("/users/a%2Fb").is_none());
    }

    #[tokio::test]
    async fn test_reload_keeps_offline_status() {
        let service = service().await;
        service.registry().offline("GET /users").await;

        service.reload(config()).await.unwrap();
        let response = service.dispatch(get("/users")).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);

        // Toggles after a reload land on the live entry
        service.registry().online("GET /users").await;
        service.reload(config()).await.unwrap();
        let response = service.dispatch(get("/users")).await;
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_current_generation() {
        let service = service().await;
        let mut broken = (*config()).clone();
        broken.resources[0].timeout = Some("abc".to_string());

        assert!(service.reload(Arc::new(broken)).await.is_err());
        let response = service.dispatch(get("/users")).await;
        assert_eq!(response.status, StatusCode::OK);
    }
}
