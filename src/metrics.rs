//! Lightweight metrics helpers for the dispatch core.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the host
//! application installs whatever recorder it likes.
//!
//! Provided metrics:
//! * `axon_dispatch_requests_total` (counter, labels: outcome, status)
//! * `axon_dispatch_chain_duration_seconds` (histogram, label: api)
//! * `axon_dispatch_filter_aborts_total` (counter, labels: filter, kind)
//! * `axon_dispatch_rate_limit_classifications_total` (counter, label: group)
//! * `axon_dispatch_rate_limited_total` (counter, label: group)
//! * `axon_dispatch_api_status_changes_total` (counter, label: status)
use std::time::{Duration, Instant};

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::Lazy;

use crate::core::api::ApiStatus;

pub const DISPATCH_REQUESTS_TOTAL: &str = "axon_dispatch_requests_total";
pub const DISPATCH_CHAIN_DURATION_SECONDS: &str = "axon_dispatch_chain_duration_seconds";
pub const DISPATCH_FILTER_ABORTS_TOTAL: &str = "axon_dispatch_filter_aborts_total";
pub const DISPATCH_RATE_LIMIT_CLASSIFICATIONS_TOTAL: &str =
    "axon_dispatch_rate_limit_classifications_total";
pub const DISPATCH_RATE_LIMITED_TOTAL: &str = "axon_dispatch_rate_limited_total";
pub const DISPATCH_API_STATUS_CHANGES_TOTAL: &str = "axon_dispatch_api_status_changes_total";

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        DISPATCH_REQUESTS_TOTAL,
        Unit::Count,
        "Requests dispatched, by outcome and response status."
    );
    describe_histogram!(
        DISPATCH_CHAIN_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent running a request's filter chain."
    );
    describe_counter!(
        DISPATCH_FILTER_ABORTS_TOTAL,
        Unit::Count,
        "Filter chains aborted by a filter error or panic."
    );
    describe_counter!(
        DISPATCH_RATE_LIMIT_CLASSIFICATIONS_TOTAL,
        Unit::Count,
        "Requests classified into a rate-limit group."
    );
    describe_counter!(
        DISPATCH_RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests refused by a rate-limit rule."
    );
    describe_counter!(
        DISPATCH_API_STATUS_CHANGES_TOTAL,
        Unit::Count,
        "API liveness transitions."
    );
});

/// Count one dispatched request.
pub fn increment_request_total(outcome: &'static str, status: u16) {
    counter!(
        DISPATCH_REQUESTS_TOTAL,
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a finished chain's duration.
pub fn record_chain_duration(api: &str, duration: Duration) {
    histogram!(DISPATCH_CHAIN_DURATION_SECONDS, "api" => api.to_string())
        .record(duration.as_secs_f64());
}

/// Count a chain aborted by a failing filter. `kind` is "error" or "panic".
pub fn increment_filter_abort(filter: &str, kind: &'static str) {
    counter!(
        DISPATCH_FILTER_ABORTS_TOTAL,
        "filter" => filter.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn increment_rate_limit_classification(group: &str) {
    counter!(DISPATCH_RATE_LIMIT_CLASSIFICATIONS_TOTAL, "group" => group.to_string())
        .increment(1);
}

pub fn increment_rate_limited(group: &str) {
    counter!(DISPATCH_RATE_LIMITED_TOTAL, "group" => group.to_string()).increment(1);
}

pub fn increment_api_status_change(status: ApiStatus) {
    counter!(DISPATCH_API_STATUS_CHANGES_TOTAL, "status" => status.to_string()).increment(1);
}

/// RAII helper measuring filter chain duration.
pub struct ChainTimer {
    start: Instant,
    api: String,
}

impl ChainTimer {
    pub fn new(api: &str) -> Self {
        Self {
            start: Instant::now(),
            api: api.to_string(),
        }
    }
}

impl Drop for ChainTimer {
    fn drop(&mut self) {
        record_chain_duration(&self.api, self.start.elapsed());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIBED);
    tracing::debug!("dispatch metric descriptions registered");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_without_recorder() {
        init_metrics();
        init_metrics();
        increment_request_total("completed", 200);
        increment_filter_abort("auth", "error");
        increment_rate_limit_classification("users");
        increment_api_status_change(ApiStatus::Down);
    }

    #[test]
    fn test_chain_timer() {
        let timer = ChainTimer::new("GET /users");
        // Timer will record duration when dropped
        drop(timer);
    }
}
