use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::{
    context::RequestContext,
    filter::{Filter, FilterError, FilterFactory, FilterRef},
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// Requests slower than this are logged at warn level
    pub slow_threshold_ms: Option<u64>,
}

#[derive(Default)]
pub struct AccessLogFactory {
    config: AccessLogConfig,
}

impl FilterFactory for AccessLogFactory {
    type Config = AccessLogConfig;

    fn config(&mut self) -> &mut AccessLogConfig {
        &mut self.config
    }

    fn apply(&self) -> Result<FilterRef, FilterError> {
        Ok(Arc::new(AccessLogFilter {
            slow_threshold_ms: self.config.slow_threshold_ms,
        }))
    }
}

/// Runs the rest of the chain, then writes one access log line.
pub struct AccessLogFilter {
    slow_threshold_ms: Option<u64>,
}

#[async_trait]
impl Filter for AccessLogFilter {
    fn name(&self) -> &str {
        super::ACCESS_LOG
    }

    async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let started = Instant::now();
        ctx.next().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let api = ctx.api().map(|api| api.name.as_str()).unwrap_or("-");
        let slow = self
            .slow_threshold_ms
            .is_some_and(|threshold| elapsed_ms > threshold);
        if slow {
            tracing::warn!(
                request_id = %ctx.id(),
                method = %ctx.method(),
                path = ctx.path(),
                api,
                application = %ctx.application_name(),
                status = ctx.status_code().as_u16(),
                aborted = ctx.is_aborted(),
                elapsed_ms,
                "slow request"
            );
        } else {
            tracing::info!(
                request_id = %ctx.id(),
                method = %ctx.method(),
                path = ctx.path(),
                api,
                application = %ctx.application_name(),
                status = ctx.status_code().as_u16(),
                aborted = ctx.is_aborted(),
                elapsed_ms,
                "access"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri};
    use serde_json::json;

    use super::*;
    use crate::core::{chain::FilterChainExecutor, context::RequestInfo, filter::DynFilterFactory};

    struct Teapot;

    #[async_trait]
    impl Filter for Teapot {
        fn name(&self) -> &str {
            "teapot"
        }

        async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
            ctx.write_with_status(StatusCode::IM_A_TEAPOT, b"short and stout");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_wraps_rest_of_chain() {
        let mut factory = AccessLogFactory::default();
        DynFilterFactory::populate(&mut factory, &json!({ "slow_threshold_ms": 0 })).unwrap();
        let log = DynFilterFactory::build(&factory).unwrap();

        let mut ctx = RequestContext::new(RequestInfo::new(Method::GET, Uri::from_static("/tea")));
        ctx.build_filters(vec![log, Arc::new(Teapot) as FilterRef]);
        FilterChainExecutor::run(&mut ctx, std::time::Duration::from_secs(1)).await;

        assert_eq!(ctx.status_code(), StatusCode::IM_A_TEAPOT);
        assert_eq!(ctx.body(), b"short and stout");
    }
}
