//! Path classification into rate-limit resource groups.
//!
//! Groups are evaluated in declared order and, within a group, items in declared order.
//! The first matching item decides the group. REGEX items are anchored on both ends, so a
//! pattern must describe the whole path.
use std::{collections::HashMap, sync::Arc};

use regex::Regex;

use crate::{
    config::{
        MatchStrategy, RateLimitConfig, RateLimitRule,
        validation::{ValidationError, ValidationResult},
    },
    core::ant_path::AntPattern,
};

#[derive(Debug, Clone)]
enum CompiledItem {
    Exact(String),
    Regex(Regex),
    AntPath(AntPattern),
}

impl CompiledItem {
    fn compile(strategy: MatchStrategy, pattern: &str) -> ValidationResult<Self> {
        let invalid = |message: String| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            message,
        };
        match strategy {
            MatchStrategy::Exact => Ok(CompiledItem::Exact(pattern.to_string())),
            MatchStrategy::Regex => Regex::new(&format!("^(?:{pattern})$"))
                .map(CompiledItem::Regex)
                .map_err(|e| invalid(e.to_string())),
            MatchStrategy::AntPath => AntPattern::compile(pattern)
                .map(CompiledItem::AntPath)
                .map_err(invalid),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            CompiledItem::Exact(pattern) => pattern == path,
            CompiledItem::Regex(regex) => regex.is_match(path),
            CompiledItem::AntPath(pattern) => pattern.matches(path),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledGroup {
    name: Arc<str>,
    items: Vec<CompiledItem>,
    rule: Option<Arc<RateLimitRule>>,
}

/// Result of a successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub group: Arc<str>,
    /// The group's enabled rule, if it has one.
    pub rule: Option<Arc<RateLimitRule>>,
}

/// Compiled rate-limit groups of one configuration generation.
#[derive(Debug, Clone, Default)]
pub struct RateLimitMatcher {
    groups: Vec<CompiledGroup>,
    rules: Vec<Arc<RateLimitRule>>,
}

impl RateLimitMatcher {
    /// Compile every pattern and attach rules to their groups.
    pub fn compile(config: &RateLimitConfig) -> ValidationResult<Self> {
        let mut enabled: HashMap<&str, Arc<RateLimitRule>> = HashMap::new();
        let rules: Vec<Arc<RateLimitRule>> =
            config.rules.iter().cloned().map(Arc::new).collect();

        for rule in &rules {
            if !config.resources.iter().any(|group| group.name == rule.resource) {
                return Err(ValidationError::UnknownReference {
                    kind: "rate limit group".to_string(),
                    name: rule.resource.clone(),
                });
            }
            if rule.enable && enabled.insert(&rule.resource, Arc::clone(rule)).is_some() {
                return Err(ValidationError::InvalidField {
                    field: format!("rate_limit.rules (group '{}')", rule.resource),
                    message: "At most one enabled rule per group".to_string(),
                });
            }
        }

        let mut groups = Vec::with_capacity(config.resources.len());
        for group in &config.resources {
            if group.name.is_empty() {
                return Err(ValidationError::MissingField {
                    field: "rate_limit.resources.name".to_string(),
                });
            }
            let items = group
                .items
                .iter()
                .map(|item| CompiledItem::compile(item.match_strategy, &item.pattern))
                .collect::<ValidationResult<Vec<_>>>()?;
            groups.push(CompiledGroup {
                name: Arc::from(group.name.as_str()),
                items,
                rule: enabled.get(group.name.as_str()).cloned(),
            });
        }

        Ok(Self { groups, rules })
    }

    /// First group whose item matches `path`. `None` means no limit applies.
    pub fn classify(&self, path: &str) -> Option<Classification> {
        self.groups
            .iter()
            .find(|group| group.items.iter().any(|item| item.matches(path)))
            .map(|group| Classification {
                group: Arc::clone(&group.name),
                rule: group.rule.clone(),
            })
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// All loaded rules, enabled or not.
    pub fn rules(&self) -> &[Arc<RateLimitRule>] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::RateLimitResource;

    fn rule(group: &str, enable: bool) -> RateLimitRule {
        RateLimitRule {
            resource: group.to_string(),
            enable,
            flow_rule: json!({ "count": 10 }).as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    fn matcher(resources: Vec<RateLimitResource>, rules: Vec<RateLimitRule>) -> RateLimitMatcher {
        RateLimitMatcher::compile(&RateLimitConfig {
            resources,
            rules,
            log_path: None,
        })
        .unwrap()
    }

    #[test]
    fn test_exact_before_catch_all() {
        let matcher = matcher(
            vec![
                RateLimitResource::new("A").with_item(MatchStrategy::Exact, "/a"),
                RateLimitResource::new("B").with_item(MatchStrategy::AntPath, "/**"),
            ],
            vec![],
        );
        assert_eq!(&*matcher.classify("/a").unwrap().group, "A");
        assert_eq!(&*matcher.classify("/a/b").unwrap().group, "B");
    }

    #[test]
    fn test_first_declared_group_wins() {
        let matcher = matcher(
            vec![
                RateLimitResource::new("wide").with_item(MatchStrategy::AntPath, "/api/**"),
                RateLimitResource::new("narrow").with_item(MatchStrategy::Exact, "/api/users"),
            ],
            vec![],
        );
        assert_eq!(&*matcher.classify("/api/users").unwrap().group, "wide");
    }

    #[test]
    fn test_regex_is_full_match() {
        let matcher = matcher(
            vec![RateLimitResource::new("users").with_item(MatchStrategy::Regex, "/users/\\d+")],
            vec![],
        );
        assert!(matcher.classify("/users/42").is_some());
        assert!(matcher.classify("/users/42/orders").is_none());
        assert!(matcher.classify("/api/users/42").is_none());
    }

    #[test]
    fn test_regex_alternation_stays_anchored() {
        let matcher = matcher(
            vec![RateLimitResource::new("alt").with_item(MatchStrategy::Regex, "/a|/b")],
            vec![],
        );
        assert!(matcher.classify("/a").is_some());
        assert!(matcher.classify("/b").is_some());
        assert!(matcher.classify("/a/x").is_none());
        assert!(matcher.classify("/x/b").is_none());
    }

    #[test]
    fn test_exact_is_byte_equality() {
        let matcher = matcher(
            vec![RateLimitResource::new("login").with_item(MatchStrategy::Exact, "/login")],
            vec![],
        );
        assert!(matcher.classify("/login").is_some());
        assert!(matcher.classify("/login/").is_none());
        assert!(matcher.classify("/Login").is_none());
    }

    #[test]
    fn test_no_match() {
        let matcher = matcher(
            vec![RateLimitResource::new("a").with_item(MatchStrategy::Exact, "/a")],
            vec![],
        );
        assert!(matcher.classify("/b").is_none());
        assert!(RateLimitMatcher::default().classify("/a").is_none());
    }

    #[test]
    fn test_only_enabled_rule_is_attached() {
        let matcher = matcher(
            vec![
                RateLimitResource::new("on").with_item(MatchStrategy::Exact, "/on"),
                RateLimitResource::new("off").with_item(MatchStrategy::Exact, "/off"),
            ],
            vec![rule("on", false), rule("on", true), rule("off", false)],
        );

        let on = matcher.classify("/on").unwrap();
        assert!(on.rule.as_ref().is_some_and(|rule| rule.enable));
        let off = matcher.classify("/off").unwrap();
        assert!(off.rule.is_none());
        assert_eq!(matcher.rules().len(), 3);
    }

    #[test]
    fn test_load_errors() {
        let compile = |resources, rules| {
            RateLimitMatcher::compile(&RateLimitConfig {
                resources,
                rules,
                log_path: None,
            })
        };

        let bad_regex = compile(
            vec![RateLimitResource::new("x").with_item(MatchStrategy::Regex, "(")],
            vec![],
        );
        assert!(matches!(bad_regex, Err(ValidationError::InvalidPattern { .. })));

        let unknown_group = compile(vec![], vec![rule("ghost", true)]);
        assert!(matches!(
            unknown_group,
            Err(ValidationError::UnknownReference { .. })
        ));

        let two_enabled = compile(
            vec![RateLimitResource::new("x").with_item(MatchStrategy::Exact, "/x")],
            vec![rule("x", true), rule("x", true)],
        );
        assert!(matches!(two_enabled, Err(ValidationError::InvalidField { .. })));
    }
}
