//! Filter chain executor.
//!
//! Drives a [`RequestContext`] through its bound filters. Filter errors and panics are
//! caught at each invocation and turned into an aborted context, and the whole chain runs
//! under the method's timeout.
use std::{any::Any, panic::AssertUnwindSafe, time::Duration};

use futures_util::FutureExt;
use http::StatusCode;

use crate::{
    core::{
        context::{ChainState, RequestContext},
        error::GatewayError,
        filter::{Filter, FilterError},
    },
    metrics,
};

/// Invoke one filter, converting an error or panic into `abort_with_error`.
pub(crate) async fn invoke_guarded(filter: &dyn Filter, ctx: &mut RequestContext) {
    let outcome = AssertUnwindSafe(filter.invoke(ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(filter = filter.name(), error = %err, "filter failed, aborting chain");
            metrics::increment_filter_abort(filter.name(), "error");
            let message = match &err {
                FilterError::Rejected { message, .. } => message.clone(),
                other => format!("filter '{}' failed: {other}", filter.name()),
            };
            ctx.abort_with_error(err.status(), message);
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::error!(filter = filter.name(), panic = %reason, "filter panicked, aborting chain");
            metrics::increment_filter_abort(filter.name(), "panic");
            ctx.abort_with_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("filter '{}' panicked: {reason}", filter.name()),
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs bound filter chains.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterChainExecutor;

impl FilterChainExecutor {
    /// Run `ctx`'s chain to completion, abort or timeout. Never leaves the context running.
    ///
    /// On timeout the chain future is dropped, so no filter touches the context afterwards,
    /// the context's cancellation token fires, and the context aborts with 504.
    pub async fn run(ctx: &mut RequestContext, timeout: Duration) -> ChainState {
        let finished = tokio::time::timeout(timeout, ctx.next()).await;
        if finished.is_err() {
            tracing::warn!(request_id = %ctx.id(), ?timeout, "filter chain timed out");
            ctx.cancellation_token().cancel();
            ctx.write_err(&GatewayError::Timeout(timeout));
        }
        ctx.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use http::{Method, Uri};

    use super::*;
    use crate::core::{
        context::RequestInfo,
        filter::{FilterError, FilterRef},
    };

    type Log = Arc<Mutex<Vec<String>>>;

    enum Step {
        Record,
        Fail,
        Panic,
        AbortWith(StatusCode, &'static str),
        Append(FilterRef),
        Wrap,
        Sleep(Duration),
    }

    struct Probe {
        name: String,
        step: Step,
        log: Log,
    }

    impl Probe {
        fn new(name: &str, step: Step, log: &Log) -> FilterRef {
            Arc::new(Self {
                name: name.to_string(),
                step,
                log: Arc::clone(log),
            })
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl Filter for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
            self.record(self.name.clone());
            match &self.step {
                Step::Record => Ok(()),
                Step::Fail => Err(FilterError::Internal("boom".into())),
                Step::Panic => panic!("kaboom"),
                Step::AbortWith(status, message) => {
                    ctx.abort_with_error(*status, *message);
                    Ok(())
                }
                Step::Append(filter) => {
                    ctx.append_filter(Arc::clone(filter));
                    Ok(())
                }
                Step::Wrap => {
                    ctx.next().await;
                    self.record(format!("{}:after", self.name));
                    Ok(())
                }
                Step::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    ctx.write(b"late");
                    self.record(format!("{}:woke", self.name));
                    Ok(())
                }
            }
        }
    }

    fn ctx(filters: Vec<FilterRef>) -> RequestContext {
        let mut ctx = RequestContext::new(RequestInfo::new(Method::GET, Uri::from_static("/t")));
        ctx.build_filters(filters);
        ctx
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_runs_in_order_and_completes() {
        let log = Log::default();
        let mut ctx = ctx(vec![
            Probe::new("a", Step::Record, &log),
            Probe::new("b", Step::Record, &log),
        ]);
        let state = FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(state, ChainState::Completed);
        assert_eq!(entries(&log), vec!["a", "b"]);
        assert_eq!(ctx.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_abort_stops_later_filters_and_first_error_wins() {
        let log = Log::default();
        let mut ctx = ctx(vec![
            Probe::new("a", Step::AbortWith(StatusCode::FORBIDDEN, "denied"), &log),
            Probe::new("b", Step::Record, &log),
        ]);
        let state = FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(state, ChainState::Aborted);
        assert_eq!(entries(&log), vec!["a"]);

        ctx.abort_with_error(StatusCode::INTERNAL_SERVER_ERROR, "later");
        ctx.next().await;
        assert_eq!(entries(&log), vec!["a"]);
        assert_eq!(ctx.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ctx.error().unwrap().message, "denied");
    }

    #[tokio::test]
    async fn test_appended_filter_runs_once_right_after_inserter() {
        let log = Log::default();
        let extra = Probe::new("extra", Step::Record, &log);
        let mut ctx = ctx(vec![
            Probe::new("a", Step::Append(extra), &log),
            Probe::new("b", Step::Record, &log),
        ]);
        FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(entries(&log), vec!["a", "extra", "b"]);
    }

    #[tokio::test]
    async fn test_appended_filters_keep_insertion_order() {
        let log = Log::default();

        struct AppendTwo(FilterRef, FilterRef);

        #[async_trait]
        impl Filter for AppendTwo {
            fn name(&self) -> &str {
                "append-two"
            }

            async fn invoke(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
                ctx.append_filter(Arc::clone(&self.0));
                ctx.append_filter(Arc::clone(&self.1));
                Ok(())
            }
        }

        let mut ctx = ctx(vec![
            Arc::new(AppendTwo(
                Probe::new("x", Step::Record, &log),
                Probe::new("y", Step::Record, &log),
            )),
            Probe::new("z", Step::Record, &log),
        ]);
        FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(entries(&log), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn test_wrapping_filter_sees_post_phase() {
        let log = Log::default();
        let mut ctx = ctx(vec![
            Probe::new("outer", Step::Wrap, &log),
            Probe::new("inner", Step::Record, &log),
        ]);
        let state = FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(state, ChainState::Completed);
        assert_eq!(entries(&log), vec!["outer", "inner", "outer:after"]);
    }

    #[tokio::test]
    async fn test_error_becomes_structured_500() {
        let log = Log::default();
        let mut ctx = ctx(vec![
            Probe::new("bad", Step::Fail, &log),
            Probe::new("never", Step::Record, &log),
        ]);
        FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(entries(&log), vec!["bad"]);
        assert_eq!(ctx.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.error().unwrap().message.contains("boom"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let log = Log::default();
        let mut ctx = ctx(vec![
            Probe::new("panicky", Step::Panic, &log),
            Probe::new("never", Step::Record, &log),
        ]);
        let state = FilterChainExecutor::run(&mut ctx, LONG).await;
        assert_eq!(state, ChainState::Aborted);
        assert_eq!(entries(&log), vec!["panicky"]);

        let response = ctx.into_response();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.error.unwrap().message.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_timeout_aborts_with_504_and_cancels() {
        let log = Log::default();
        let mut ctx = ctx(vec![Probe::new(
            "slow",
            Step::Sleep(Duration::from_millis(200)),
            &log,
        )]);
        let token = ctx.cancellation_token().clone();

        let state = FilterChainExecutor::run(&mut ctx, Duration::from_millis(20)).await;
        assert_eq!(state, ChainState::Aborted);
        assert!(token.is_cancelled());
        assert_eq!(ctx.status_code(), StatusCode::GATEWAY_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(entries(&log), vec!["slow"]);
        assert!(ctx.body().is_empty());
    }
}
