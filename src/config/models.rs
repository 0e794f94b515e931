//! Configuration data structures for the dispatch core.
//!
//! These types map directly onto YAML (also JSON / TOML) API configuration documents.
//! They are a pure structural decode: durations stay raw strings and nothing here applies
//! business defaults. [`crate::config::validation`] normalizes and checks them before the
//! route table is built.
use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Timeout used when a resource or method leaves `timeout` empty.
pub const DEFAULT_TIMEOUT_STR: &str = "1s";

/// Root of an API configuration document.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiConfig {
    pub name: String,
    pub description: String,
    pub resources: Vec<Resource>,
    pub definitions: Vec<Definition>,
    pub plugin_file_path: String,
    pub plugins_group: Vec<PluginsGroup>,
    pub rate_limit: RateLimitConfig,
    /// Gateway-wide filter settings keyed by filter name. Resources and methods may
    /// override them with their own `filter_configs`.
    pub filter_configs: HashMap<String, serde_json::Value>,
}

impl ApiConfig {
    /// Create a new API configuration builder
    pub fn builder() -> ApiConfigBuilder {
        ApiConfigBuilder::default()
    }
}

/// Builder for ApiConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ApiConfigBuilder {
    name: Option<String>,
    resources: Vec<Resource>,
    definitions: Vec<Definition>,
    plugins_group: Vec<PluginsGroup>,
    rate_limit: RateLimitConfig,
    filter_configs: HashMap<String, serde_json::Value>,
}

impl ApiConfigBuilder {
    /// Set the configuration name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a top-level resource
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Add a named JSON-schema body definition
    pub fn definition(mut self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.definitions.push(Definition {
            name: name.into(),
            schema: schema.into(),
        });
        self
    }

    /// Add a plugins group
    pub fn plugins_group(mut self, group: PluginsGroup) -> Self {
        self.plugins_group.push(group);
        self
    }

    /// Set the rate limit section
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set gateway-wide configuration for a filter
    pub fn filter_config(mut self, filter: impl Into<String>, value: serde_json::Value) -> Self {
        self.filter_configs.insert(filter.into(), value);
        self
    }

    /// Build the final ApiConfig
    pub fn build(self) -> Result<ApiConfig, String> {
        if self.resources.is_empty() {
            return Err("At least one resource must be configured".to_string());
        }

        Ok(ApiConfig {
            name: self.name.unwrap_or_default(),
            description: String::new(),
            resources: self.resources,
            definitions: self.definitions,
            plugin_file_path: String::new(),
            plugins_group: self.plugins_group,
            rate_limit: self.rate_limit,
            filter_configs: self.filter_configs,
        })
    }
}

/// HTTP verb accepted by a configured method.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    #[default]
    Any,
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Any => "ANY",
            HttpVerb::Get => "GET",
            HttpVerb::Head => "HEAD",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Delete => "DELETE",
            HttpVerb::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANY" => Ok(HttpVerb::Any),
            "GET" => Ok(HttpVerb::Get),
            "HEAD" => Ok(HttpVerb::Head),
            "POST" => Ok(HttpVerb::Post),
            "PUT" => Ok(HttpVerb::Put),
            "PATCH" => Ok(HttpVerb::Patch),
            "DELETE" => Ok(HttpVerb::Delete),
            "OPTIONS" => Ok(HttpVerb::Options),
            other => Err(format!("unsupported HTTP verb '{other}'")),
        }
    }
}

impl From<&http::Method> for HttpVerb {
    /// Verbs the configuration cannot express collapse to `ANY`, which only ever matches an
    /// `ANY` method entry.
    fn from(method: &http::Method) -> Self {
        method.as_str().parse().unwrap_or(HttpVerb::Any)
    }
}

/// Protocol on either side of a method: what the client speaks, what the backend speaks.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Dubbo,
    #[default]
    Http,
}

/// A node of the resource tree. `path` is relative to the parent resource.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Resource {
    pub id: Option<i64>,
    /// Restful, Dubbo
    #[serde(rename = "type")]
    pub resource_type: String,
    pub path: String,
    /// Raw duration string, e.g. "500ms". Empty or missing means [`DEFAULT_TIMEOUT_STR`].
    pub timeout: Option<String>,
    pub description: String,
    pub filters: Vec<String>,
    pub plugins: PluginsConfig,
    pub methods: Vec<Method>,
    pub resources: Vec<Resource>,
    pub headers: HashMap<String, String>,
    pub filter_configs: HashMap<String, serde_json::Value>,
}

impl Resource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_child(mut self, child: Resource) -> Self {
        self.resources.push(child);
        self
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.extend(filters.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }
}

/// A dispatch target on a resource, identified by its verb.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Method {
    pub id: Option<i64>,
    pub resource_path: String,
    /// true means the method is up and false means the method is down
    pub enable: bool,
    pub timeout: Option<String>,
    pub mock: bool,
    pub filters: Vec<String>,
    pub http_verb: HttpVerb,
    pub inbound_request: InboundRequest,
    pub integration_request: IntegrationRequest,
    pub filter_configs: HashMap<String, serde_json::Value>,
}

impl Method {
    /// An enabled method for `verb` with default descriptors.
    pub fn new(verb: HttpVerb) -> Self {
        Self {
            enable: true,
            http_verb: verb,
            ..Default::default()
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.extend(filters.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_filter_config(mut self, filter: impl Into<String>, value: serde_json::Value) -> Self {
        self.filter_configs.insert(filter.into(), value);
        self
    }
}

/// What the gateway expects from the client.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct InboundRequest {
    pub request_type: RequestType,
    pub headers: Vec<Params>,
    pub query_strings: Vec<Params>,
    pub request_body: Vec<BodyDefinition>,
}

/// Simple parameter definition.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Params {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub required: bool,
}

/// Connects a request body to one of the document's [`Definition`]s.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BodyDefinition {
    pub definition_name: String,
}

/// Backend request format and target.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IntegrationRequest {
    pub request_type: RequestType,
    pub dubbo_backend_config: Option<DubboBackendConfig>,
    pub http_backend_config: Option<HttpBackendConfig>,
    pub mapping_params: Vec<MappingParam>,
}

/// Mapping rule for headers, query strings and body fields.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MappingParam {
    pub name: String,
    pub map_to: String,
    pub map_type: String,
}

fn default_dubbo_protocol() -> String {
    "dubbo".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DubboBackendConfig {
    pub cluster_name: String,
    pub application_name: String,
    #[serde(default = "default_dubbo_protocol")]
    pub protocol: String,
    pub group: String,
    pub version: String,
    pub interface: String,
    pub method: String,
    pub retries: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HttpBackendConfig {
    pub url: String,
    /// downstream host
    pub host: String,
    /// path to replace
    pub path: String,
    /// http or https
    pub scheme: String,
}

/// Named JSON-schema request body.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Definition {
    pub name: String,
    pub schema: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Plugin {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    pub priority: i32,
    /// Name of the filter factory that provides this plugin. Falls back to `name`.
    pub external_lookup_name: String,
}

impl Plugin {
    pub fn lookup_name(&self) -> &str {
        if self.external_lookup_name.is_empty() {
            &self.name
        } else {
            &self.external_lookup_name
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PluginsGroup {
    pub id: Option<i64>,
    pub group_name: String,
    pub plugins: Vec<Plugin>,
}

/// Pre & post plugins attached to a resource.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PluginsConfig {
    pub pre: PluginsInUse,
    pub post: PluginsInUse,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PluginsInUse {
    pub group_names: Vec<String>,
    pub plugin_names: Vec<String>,
}

impl PluginsInUse {
    pub fn is_empty(&self) -> bool {
        self.group_names.is_empty() && self.plugin_names.is_empty()
    }
}

/// Rate limit section: path groups plus the rules enforced for them.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RateLimitConfig {
    pub resources: Vec<RateLimitResource>,
    pub rules: Vec<RateLimitRule>,
    pub log_path: Option<String>,
}

/// API group for rate limiting; every path in the group counts as the same resource.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RateLimitResource {
    pub id: Option<i64>,
    pub name: String,
    pub items: Vec<MatchItem>,
}

impl RateLimitResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_item(mut self, match_strategy: MatchStrategy, pattern: impl Into<String>) -> Self {
        self.items.push(MatchItem {
            match_strategy,
            pattern: pattern.into(),
        });
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MatchItem {
    pub match_strategy: MatchStrategy,
    pub pattern: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStrategy {
    #[default]
    Exact,
    Regex,
    AntPath,
}

/// A group's rate-limit rule. `flow_rule` is handed to the rate-limiting backend untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RateLimitRule {
    pub id: Option<i64>,
    /// Name of the [`RateLimitResource`] this rule applies to.
    pub resource: String,
    pub enable: bool,
    pub flow_rule: serde_json::Map<String, serde_json::Value>,
}
