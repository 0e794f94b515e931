//! Resource tree and route resolution.
//!
//! Resources nest: a child's `path` is relative to its parent, and a single resource path
//! may span several segments. Segments are either literals or `{name}` parameters.
//!
//! Resolution walks every branch that can consume the request path and keeps the most
//! specific hit: comparing segment by segment, a literal beats a parameter at the first
//! position where two candidates differ. So `/users/active` wins over `/users/{id}`, and a
//! literal branch that dead-ends falls back to the parameterised one.
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use crate::{
    config::{
        ApiConfig, HttpVerb, InboundRequest, IntegrationRequest, Method, Resource,
        validation::{ValidationError, ValidationResult, parse_timeout},
    },
    core::{
        api::{Api, ApiStatus, RequestMethod},
        binder::{ChainScope, FilterBinder},
        filter::FilterList,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// Parsed resource path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        for raw in path.split('/').filter(|s| !s.is_empty()) {
            if let Some(inner) = raw.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .ok_or_else(|| format!("unterminated parameter segment '{raw}'"))?;
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(format!("invalid parameter segment '{raw}'"));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if raw.contains(['{', '}']) {
                return Err(format!("a parameter must span a whole segment: '{raw}'"));
            } else {
                segments.push(Segment::Literal(decode_segment(raw)));
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// This pattern followed by `child`.
    pub fn join(&self, child: &PathPattern) -> PathPattern {
        let mut segments = self.segments.clone();
        segments.extend(child.segments.iter().cloned());
        PathPattern { segments }
    }

    /// Pattern with parameter names erased, for conflict checks: `/users/{}`.
    pub fn shape(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => format!("/{literal}"),
                Segment::Param(_) => "/{}".to_string(),
            })
            .collect()
    }

    /// Bind this pattern against the front of `path`. Returns the number of segments used.
    fn bind_prefix(&self, path: &[String], walk: &mut Walk) -> Option<usize> {
        if path.len() < self.segments.len() {
            return None;
        }
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == value => walk.kinds.push(false),
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    walk.kinds.push(true);
                    walk.params.push((name.clone(), value.clone()));
                }
            }
        }
        Some(self.segments.len())
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => write!(f, "/{literal}")?,
                Segment::Param(name) => write!(f, "/{{{name}}}")?,
            }
        }
        Ok(())
    }
}

fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Percent-decode a whole request path. Undecodable input is returned as is.
pub fn decode_path(path: &str) -> Cow<'_, str> {
    urlencoding::decode(path).unwrap_or(Cow::Borrowed(path))
}

/// Split a request path into non-empty, percent-decoded segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(decode_segment)
        .collect()
}

/// Resource attributes visible to filters once a route matched.
#[derive(Debug)]
pub struct ResourceInfo {
    pub path: String,
    pub full_path: String,
    pub resource_type: String,
    pub description: String,
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
}

/// A dispatch target: one enabled method with its bound filter chain.
pub struct RouteMethod {
    pub api_name: String,
    pub verb: HttpVerb,
    pub full_path: String,
    pub timeout: Duration,
    pub mock: bool,
    pub inbound: InboundRequest,
    pub integration: IntegrationRequest,
    pub filters: FilterList,
}

impl RouteMethod {
    /// Registry descriptor for this method. Freshly loaded APIs start `Up`.
    pub fn to_api(&self) -> Api {
        Api::new(self.api_name.clone(), RequestMethod::from(self.verb))
            .with_types(
                self.inbound.request_type.into(),
                self.integration.request_type.into(),
            )
            .with_status(ApiStatus::Up)
            .with_metadata(serde_json::json!({
                "path": self.full_path,
                "verb": self.verb.as_str(),
                "timeout_ms": self.timeout.as_millis() as u64,
                "mock": self.mock,
            }))
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }
}

impl fmt::Debug for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMethod")
            .field("api_name", &self.api_name)
            .field("timeout", &self.timeout)
            .field("mock", &self.mock)
            .field("filters", &self.filter_names())
            .finish_non_exhaustive()
    }
}

/// Successful resolution.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub method: Arc<RouteMethod>,
    /// Matched resources, root first.
    pub resources: Vec<Arc<ResourceInfo>>,
    pub params: HashMap<String, String>,
}

impl RouteMatch {
    pub fn api_name(&self) -> &str {
        &self.method.api_name
    }

    pub fn filters(&self) -> &FilterList {
        &self.method.filters
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(RouteMatch),
    /// The path exists but has no enabled method for the verb.
    MethodNotAllowed { path: String },
    NotFound,
}

struct ResourceNode {
    pattern: PathPattern,
    info: Arc<ResourceInfo>,
    methods: Vec<Arc<RouteMethod>>,
    children: Vec<ResourceNode>,
}

impl ResourceNode {
    fn lookup(&self, verb: HttpVerb) -> Option<&Arc<RouteMethod>> {
        self.methods
            .iter()
            .find(|method| method.verb == verb)
            .or_else(|| self.methods.iter().find(|method| method.verb == HttpVerb::Any))
    }
}

struct Candidate {
    kinds: Vec<bool>,
    method: Arc<RouteMethod>,
    resources: Vec<Arc<ResourceInfo>>,
    params: Vec<(String, String)>,
}

#[derive(Default)]
struct Walk {
    resources: Vec<Arc<ResourceInfo>>,
    params: Vec<(String, String)>,
    /// One entry per consumed segment: true when a parameter consumed it.
    kinds: Vec<bool>,
    best: Option<Candidate>,
    path_matched: bool,
}

impl Walk {
    fn offer(&mut self, method: &Arc<RouteMethod>) {
        // Ties keep the earlier (declaration order) candidate
        if let Some(best) = &self.best {
            if best.kinds <= self.kinds {
                return;
            }
        }
        self.best = Some(Candidate {
            kinds: self.kinds.clone(),
            method: Arc::clone(method),
            resources: self.resources.clone(),
            params: self.params.clone(),
        });
    }
}

/// Read-only resource hierarchy of one configuration generation.
#[derive(Default)]
pub struct ResourceTree {
    roots: Vec<ResourceNode>,
}

impl ResourceTree {
    /// Build the tree and bind every enabled method's filter chain.
    pub fn build(config: &ApiConfig, binder: &mut FilterBinder<'_>) -> ValidationResult<Self> {
        let scope = ChainScope::root(config);
        let mut routes = HashSet::new();
        let roots = Self::build_level(
            &config.resources,
            &PathPattern::default(),
            &scope,
            binder,
            &mut routes,
        )?;
        Ok(Self { roots })
    }

    fn build_level(
        resources: &[Resource],
        parent: &PathPattern,
        scope: &ChainScope,
        binder: &mut FilterBinder<'_>,
        routes: &mut HashSet<(String, HttpVerb)>,
    ) -> ValidationResult<Vec<ResourceNode>> {
        let mut nodes: Vec<ResourceNode> = Vec::with_capacity(resources.len());

        for resource in resources {
            let pattern = PathPattern::parse(&resource.path).map_err(|message| {
                ValidationError::InvalidPattern {
                    pattern: resource.path.clone(),
                    message,
                }
            })?;
            if let Some(sibling) = nodes
                .iter()
                .find(|node| node.pattern.shape() == pattern.shape())
            {
                return Err(ValidationError::RouteConflict {
                    message: format!(
                        "Sibling resources '{}' and '{}' under '{parent}' have the same path pattern",
                        sibling.info.path, resource.path
                    ),
                });
            }

            let full = parent.join(&pattern);
            let full_path = full.to_string();
            let timeout = parse_timeout(
                resource.timeout.as_deref(),
                &format!("resource '{full_path}' timeout"),
            )?;
            let info = Arc::new(ResourceInfo {
                path: resource.path.clone(),
                full_path: full_path.clone(),
                resource_type: resource.resource_type.clone(),
                description: resource.description.clone(),
                timeout,
                headers: resource.headers.clone(),
            });

            let scope = binder.enter(scope, resource)?;
            let mut methods: Vec<Arc<RouteMethod>> = Vec::new();
            for (i, method) in resource.methods.iter().enumerate() {
                if resource.methods[..i]
                    .iter()
                    .any(|other| other.http_verb == method.http_verb)
                {
                    return Err(ValidationError::RouteConflict {
                        message: format!(
                            "Resource '{full_path}' declares {} more than once",
                            method.http_verb
                        ),
                    });
                }
                // Distinct branches can spell the same route, e.g. `/users` + `/active`
                // next to `/users/active`
                if !routes.insert((full.shape(), method.http_verb)) {
                    return Err(ValidationError::RouteConflict {
                        message: format!(
                            "Route '{} {full_path}' is declared more than once",
                            method.http_verb
                        ),
                    });
                }
                if !method.enable {
                    tracing::debug!(path = %full_path, verb = %method.http_verb, "skipping disabled method");
                    continue;
                }
                methods.push(Arc::new(Self::build_method(
                    method, &full_path, &info, &scope, binder,
                )?));
            }

            let children =
                Self::build_level(&resource.resources, &full, &scope, binder, routes)?;
            nodes.push(ResourceNode {
                pattern,
                info,
                methods,
                children,
            });
        }

        Ok(nodes)
    }

    fn build_method(
        method: &Method,
        full_path: &str,
        resource: &ResourceInfo,
        scope: &ChainScope,
        binder: &mut FilterBinder<'_>,
    ) -> ValidationResult<RouteMethod> {
        let api_name = format!("{} {full_path}", method.http_verb);
        // An empty method timeout inherits the resource's
        let timeout = match method.timeout.as_deref().map(str::trim) {
            None | Some("") => resource.timeout,
            raw => parse_timeout(raw, &format!("method {api_name} timeout"))?,
        };

        Ok(RouteMethod {
            filters: binder.bind(scope, method)?,
            api_name,
            verb: method.http_verb,
            full_path: full_path.to_string(),
            timeout,
            mock: method.mock,
            inbound: method.inbound_request.clone(),
            integration: method.integration_request.clone(),
        })
    }

    /// Resolve a request path and verb. Pure read.
    pub fn resolve(&self, path: &str, verb: HttpVerb) -> Resolution {
        let segments = split_path(path);
        let mut walk = Walk::default();
        Self::descend(&self.roots, &segments, verb, &mut walk);

        match walk.best {
            Some(best) => Resolution::Matched(RouteMatch {
                method: best.method,
                resources: best.resources,
                params: best.params.into_iter().collect(),
            }),
            None if walk.path_matched => Resolution::MethodNotAllowed {
                path: path.to_string(),
            },
            None => Resolution::NotFound,
        }
    }

    fn descend(nodes: &[ResourceNode], rest: &[String], verb: HttpVerb, walk: &mut Walk) {
        for node in nodes {
            let (params_mark, kinds_mark) = (walk.params.len(), walk.kinds.len());
            if let Some(consumed) = node.pattern.bind_prefix(rest, walk) {
                walk.resources.push(Arc::clone(&node.info));
                let remaining = &rest[consumed..];
                if remaining.is_empty() && !node.methods.is_empty() {
                    walk.path_matched = true;
                    if let Some(method) = node.lookup(verb) {
                        walk.offer(method);
                    }
                }
                Self::descend(&node.children, remaining, verb, walk);
                walk.resources.pop();
            }
            walk.params.truncate(params_mark);
            walk.kinds.truncate(kinds_mark);
        }
    }

    /// Every dispatch target in the tree, depth first.
    pub fn methods(&self) -> Vec<Arc<RouteMethod>> {
        fn collect(nodes: &[ResourceNode], out: &mut Vec<Arc<RouteMethod>>) {
            for node in nodes {
                out.extend(node.methods.iter().cloned());
                collect(&node.children, out);
            }
        }
        let mut out = Vec::new();
        collect(&self.roots, &mut out);
        out
    }
}
