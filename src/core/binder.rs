//! Filter registry and chain binding.
//!
//! [`FilterRegistry`] maps filter names to factory constructors. [`FilterBinder`] turns the
//! filter references of one configuration generation into bound [`FilterList`]s:
//!
//! ```text
//! chain = pre plugins ++ ancestor resource filters (root → leaf) ++ method filters ++ post plugins
//! ```
//!
//! Each name appears once (first occurrence wins). Filter settings merge
//! global → resource → method, and each distinct (factory, settings) pair is built once.
use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{
    config::{
        ApiConfig, Method, Plugin, PluginsInUse, Resource,
        validation::{ValidationError, ValidationResult},
    },
    core::filter::{DynFilterFactory, FilterList, FilterRef},
};

type FactoryConstructor = Arc<dyn Fn() -> Box<dyn DynFilterFactory> + Send + Sync>;

/// Name → factory constructor table. Each bind gets a fresh factory instance.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    factories: HashMap<String, FactoryConstructor>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn DynFilterFactory> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn create(&self, name: &str) -> Option<Box<dyn DynFilterFactory>> {
        self.factories.get(name).map(|constructor| constructor())
    }
}

/// A filter reference after plugin resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterSlot {
    /// Key into `filter_configs`, also used for deduplication.
    name: String,
    /// Registry name of the factory.
    factory: String,
}

impl FilterSlot {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            factory: name.to_string(),
        }
    }

    fn plugin(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
            factory: plugin.lookup_name().to_string(),
        }
    }
}

/// Filter references accumulated while descending the resource tree.
#[derive(Debug, Clone, Default)]
pub struct ChainScope {
    pre: Vec<FilterSlot>,
    filters: Vec<FilterSlot>,
    post: Vec<FilterSlot>,
    configs: HashMap<String, Value>,
}

impl ChainScope {
    /// Root scope: gateway-wide settings only.
    pub fn root(config: &ApiConfig) -> Self {
        Self {
            configs: config.filter_configs.clone(),
            ..Default::default()
        }
    }
}

/// Binds chains for one configuration generation.
pub struct FilterBinder<'a> {
    registry: &'a FilterRegistry,
    config: &'a ApiConfig,
    built: HashMap<(String, String), FilterRef>,
}

impl<'a> FilterBinder<'a> {
    pub fn new(registry: &'a FilterRegistry, config: &'a ApiConfig) -> Self {
        Self {
            registry,
            config,
            built: HashMap::new(),
        }
    }

    /// Number of distinct filter instances built so far.
    pub fn built_count(&self) -> usize {
        self.built.len()
    }

    /// Scope for `resource`, nested inside `parent`.
    pub fn enter(&self, parent: &ChainScope, resource: &Resource) -> ValidationResult<ChainScope> {
        let mut scope = parent.clone();
        scope
            .pre
            .extend(self.resolve_plugins(&resource.plugins.pre, &resource.path)?);
        scope
            .post
            .extend(self.resolve_plugins(&resource.plugins.post, &resource.path)?);
        scope
            .filters
            .extend(resource.filters.iter().map(|name| FilterSlot::named(name)));
        merge_configs(&mut scope.configs, &resource.filter_configs);
        Ok(scope)
    }

    /// Build the chain for `method` inside `scope`.
    pub fn bind(&mut self, scope: &ChainScope, method: &Method) -> ValidationResult<FilterList> {
        let mut configs = scope.configs.clone();
        merge_configs(&mut configs, &method.filter_configs);

        let method_filters = method.filters.iter().map(|name| FilterSlot::named(name));
        let mut slots: Vec<FilterSlot> = Vec::new();
        for slot in scope
            .pre
            .iter()
            .cloned()
            .chain(scope.filters.iter().cloned())
            .chain(method_filters)
            .chain(scope.post.iter().cloned())
        {
            if !slots.iter().any(|seen| seen.name == slot.name) {
                slots.push(slot);
            }
        }

        let mut chain = Vec::with_capacity(slots.len());
        for slot in &slots {
            let settings = configs.get(&slot.name).cloned().unwrap_or(Value::Null);
            chain.push(self.build(slot, &settings)?);
        }
        Ok(chain.into())
    }

    fn build(&mut self, slot: &FilterSlot, settings: &Value) -> ValidationResult<FilterRef> {
        let key = (slot.factory.clone(), settings.to_string());
        if let Some(filter) = self.built.get(&key) {
            return Ok(Arc::clone(filter));
        }

        let mut factory =
            self.registry
                .create(&slot.factory)
                .ok_or_else(|| ValidationError::UnknownReference {
                    kind: "filter".to_string(),
                    name: slot.factory.clone(),
                })?;
        let filter = factory
            .populate(settings)
            .and_then(|()| factory.build())
            .map_err(|e| ValidationError::FilterBuild {
                filter: slot.name.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(filter = %slot.name, factory = %slot.factory, "built filter");
        self.built.insert(key, Arc::clone(&filter));
        Ok(filter)
    }

    /// Plugins named by `in_use`, ordered by ascending priority (declaration order on ties).
    fn resolve_plugins(&self, in_use: &PluginsInUse, resource: &str) -> ValidationResult<Vec<FilterSlot>> {
        if in_use.is_empty() {
            return Ok(Vec::new());
        }

        let mut plugins: Vec<&Plugin> = Vec::new();
        for group_name in &in_use.group_names {
            let group = self
                .config
                .plugins_group
                .iter()
                .find(|group| &group.group_name == group_name)
                .ok_or_else(|| ValidationError::UnknownReference {
                    kind: format!("plugins group (resource '{resource}')"),
                    name: group_name.clone(),
                })?;
            plugins.extend(group.plugins.iter());
        }
        for plugin_name in &in_use.plugin_names {
            let plugin = self
                .config
                .plugins_group
                .iter()
                .flat_map(|group| group.plugins.iter())
                .find(|plugin| &plugin.name == plugin_name)
                .ok_or_else(|| ValidationError::UnknownReference {
                    kind: format!("plugin (resource '{resource}')"),
                    name: plugin_name.clone(),
                })?;
            plugins.push(plugin);
        }

        let mut unique: Vec<&Plugin> = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            if !unique.iter().any(|seen| seen.name == plugin.name) {
                unique.push(plugin);
            }
        }
        unique.sort_by_key(|plugin| plugin.priority);
        Ok(unique.into_iter().map(FilterSlot::plugin).collect())
    }
}

/// Overlay `overrides` onto `base`. Objects merge key by key; anything else replaces.
fn merge_configs(base: &mut HashMap<String, Value>, overrides: &HashMap<String, Value>) {
    for (name, value) in overrides {
        match (base.get_mut(name), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (key, field) in incoming {
                    existing.insert(key.clone(), field.clone());
                }
            }
            _ => {
                base.insert(name.clone(), value.clone());
            }
        }
    }
}
