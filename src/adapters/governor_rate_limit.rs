//! In-process [`RateLimitBackend`] built atop `governor`.
//!
//! The rule payload is read for two fields:
//! * `count`: requests allowed per interval (required, > 0)
//! * `stat_interval_ms`: interval length in milliseconds (default 1000)
//!
//! One direct limiter is kept per group, tagged with the (count, interval) it was built
//! for. Editing a group's rule on reload replaces its limiter with a fresh budget, while
//! unchanged rules keep their state.
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use scc::HashMap;

use crate::{
    config::RateLimitRule,
    ports::rate_limit_backend::{RateLimitBackend, RateLimitBackendError, RateLimitDecision},
};

pub type DirectRateLimiterImpl = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const DEFAULT_STAT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LimiterSpec {
    count: u32,
    interval_ms: u64,
}

impl LimiterSpec {
    fn from_rule(group: &str, rule: &RateLimitRule) -> Result<Self, RateLimitBackendError> {
        let invalid = |message: &str| RateLimitBackendError::InvalidRule {
            group: group.to_string(),
            message: message.to_string(),
        };

        let count = rule
            .flow_rule
            .get("count")
            .and_then(serde_json::Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
            .filter(|count| *count > 0)
            .ok_or_else(|| invalid("'count' must be a positive integer"))?;

        let interval_ms = match rule.flow_rule.get("stat_interval_ms") {
            None => DEFAULT_STAT_INTERVAL_MS,
            Some(value) => value
                .as_u64()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid("'stat_interval_ms' must be a positive integer"))?,
        };

        Ok(Self { count, interval_ms })
    }

    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.count)?;
        let period = Duration::from_millis(self.interval_ms) / self.count;
        Quota::with_period(period).map(|quota| quota.allow_burst(burst))
    }
}

/// Token-bucket enforcement of `count` requests per `stat_interval_ms`, per group.
#[derive(Default)]
pub struct GovernorRateLimitBackend {
    limiters: HashMap<String, (LimiterSpec, Arc<DirectRateLimiterImpl>)>,
}

impl GovernorRateLimitBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn limiter(
        &self,
        group: &str,
        spec: LimiterSpec,
    ) -> Result<Arc<DirectRateLimiterImpl>, RateLimitBackendError> {
        let current = self
            .limiters
            .read_async(group, |_, (current, limiter)| {
                (*current == spec).then(|| limiter.clone())
            })
            .await;
        match current {
            Some(Some(limiter)) => return Ok(limiter),
            Some(None) => tracing::info!(
                group,
                count = spec.count,
                interval_ms = spec.interval_ms,
                "rate limit rule changed, replacing limiter"
            ),
            None => tracing::debug!(
                group,
                count = spec.count,
                interval_ms = spec.interval_ms,
                "creating rate limiter"
            ),
        }

        let quota = spec.quota().ok_or_else(|| RateLimitBackendError::InvalidRule {
            group: group.to_string(),
            message: format!("interval too short for {} requests", spec.count),
        })?;
        let limiter = Arc::new(RateLimiter::direct(quota));
        let _ = self
            .limiters
            .upsert_async(group.to_string(), (spec, Arc::clone(&limiter)))
            .await;

        // Concurrent first requests may each have built one; share whichever is stored
        Ok(self
            .limiters
            .read_async(group, |_, (current, stored)| {
                (*current == spec).then(|| stored.clone())
            })
            .await
            .flatten()
            .unwrap_or(limiter))
    }

    /// Number of groups holding a limiter.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[async_trait]
impl RateLimitBackend for GovernorRateLimitBackend {
    async fn check(
        &self,
        group: &str,
        rule: &RateLimitRule,
    ) -> Result<RateLimitDecision, RateLimitBackendError> {
        let spec = LimiterSpec::from_rule(group, rule)?;
        let limiter = self.limiter(group, spec).await?;
        if limiter.check().is_ok() {
            Ok(RateLimitDecision::Allowed)
        } else {
            Ok(RateLimitDecision::Limited)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(flow_rule: serde_json::Value) -> RateLimitRule {
        RateLimitRule {
            resource: "users".to_string(),
            enable: true,
            flow_rule: flow_rule.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_limits_after_count() {
        let backend = GovernorRateLimitBackend::new();
        let rule = rule(json!({ "count": 2, "stat_interval_ms": 60000 }));

        assert_eq!(backend.check("users", &rule).await.unwrap(), RateLimitDecision::Allowed);
        assert_eq!(backend.check("users", &rule).await.unwrap(), RateLimitDecision::Allowed);
        assert_eq!(backend.check("users", &rule).await.unwrap(), RateLimitDecision::Limited);
    }

    #[tokio::test]
    async fn test_groups_have_separate_budgets() {
        let backend = GovernorRateLimitBackend::new();
        let rule = rule(json!({ "count": 1, "stat_interval_ms": 60000 }));

        assert_eq!(backend.check("a", &rule).await.unwrap(), RateLimitDecision::Allowed);
        assert_eq!(backend.check("b", &rule).await.unwrap(), RateLimitDecision::Allowed);
        assert_eq!(backend.check("a", &rule).await.unwrap(), RateLimitDecision::Limited);
    }

    #[tokio::test]
    async fn test_invalid_payloads() {
        let backend = GovernorRateLimitBackend::new();
        for payload in [
            json!({}),
            json!({ "count": 0 }),
            json!({ "count": "ten" }),
            json!({ "count": 0.5 }),
            json!({ "count": 2.5 }),
            json!({ "count": -3 }),
            json!({ "count": 5_000_000_000u64 }),
            json!({ "count": 5, "stat_interval_ms": 0 }),
        ] {
            let err = backend.check("users", &rule(payload)).await.unwrap_err();
            assert!(matches!(err, RateLimitBackendError::InvalidRule { .. }));
        }
    }

    #[tokio::test]
    async fn test_edited_rule_replaces_group_limiter() {
        let backend = GovernorRateLimitBackend::new();
        let strict = rule(json!({ "count": 1, "stat_interval_ms": 60000 }));
        let relaxed = rule(json!({ "count": 3, "stat_interval_ms": 60000 }));

        assert_eq!(backend.check("users", &strict).await.unwrap(), RateLimitDecision::Allowed);
        assert_eq!(backend.check("users", &strict).await.unwrap(), RateLimitDecision::Limited);

        // New budget for the edited rule, old limiter dropped
        for _ in 0..3 {
            assert_eq!(backend.check("users", &relaxed).await.unwrap(), RateLimitDecision::Allowed);
        }
        assert_eq!(backend.check("users", &relaxed).await.unwrap(), RateLimitDecision::Limited);
        assert_eq!(backend.len(), 1);

        // Flipping back and forth never grows the map
        for count in 1..=20 {
            let edited = rule(json!({ "count": count, "stat_interval_ms": 60000 }));
            backend.check("users", &edited).await.unwrap();
        }
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_rule_keeps_budget() {
        let backend = GovernorRateLimitBackend::new();
        let first = rule(json!({ "count": 1, "stat_interval_ms": 60000 }));
        let reloaded = rule(json!({ "count": 1, "stat_interval_ms": 60000 }));

        assert_eq!(backend.check("users", &first).await.unwrap(), RateLimitDecision::Allowed);
        assert_eq!(backend.check("users", &reloaded).await.unwrap(), RateLimitDecision::Limited);
    }
}
