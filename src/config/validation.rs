use std::{collections::HashSet, time::Duration};

use crate::{
    config::models::{
        ApiConfig, DEFAULT_TIMEOUT_STR, HttpVerb, IntegrationRequest, Method, RequestType,
        Resource,
    },
    core::{rate_limit::RateLimitMatcher, resource::PathPattern},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid duration '{value}' for {field}: {message}")]
    InvalidDuration {
        field: String,
        value: String,
        message: String,
    },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Unknown {kind} '{name}'")]
    UnknownReference { kind: String, name: String },

    #[error("Filter '{filter}' could not be built: {message}")]
    FilterBuild { filter: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Parse a timeout field. `None` and `""` mean the 1s default.
pub fn parse_timeout(raw: Option<&str>, field: &str) -> ValidationResult<Duration> {
    let value = match raw.map(str::trim) {
        None | Some("") => DEFAULT_TIMEOUT_STR,
        Some(value) => value,
    };
    humantime::parse_duration(value).map_err(|e| ValidationError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

/// API configuration validator
pub struct ApiConfigValidator;

impl ApiConfigValidator {
    /// Validate the entire API configuration, reporting every problem found.
    pub fn validate(config: &ApiConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let definitions = Self::validate_definitions(config, &mut errors);

        if config.resources.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "resources".to_string(),
            });
        } else {
            Self::validate_resources(
                &config.resources,
                "",
                &definitions,
                &mut HashSet::new(),
                &mut errors,
            );
        }

        Self::validate_plugins(config, &mut errors);

        if let Err(e) = RateLimitMatcher::compile(&config.rate_limit) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Definition names must be unique and non-empty. Returns the known names.
    fn validate_definitions<'c>(
        config: &'c ApiConfig,
        errors: &mut Vec<ValidationError>,
    ) -> HashSet<&'c str> {
        let mut names = HashSet::new();
        for (i, definition) in config.definitions.iter().enumerate() {
            if definition.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("definitions[{i}].name"),
                });
            } else if !names.insert(definition.name.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("definitions[{i}].name"),
                    message: format!("Duplicate definition '{}'", definition.name),
                });
            }
        }
        names
    }

    fn validate_resources(
        resources: &[Resource],
        parent: &str,
        definitions: &HashSet<&str>,
        routes: &mut HashSet<(String, HttpVerb)>,
        errors: &mut Vec<ValidationError>,
    ) {
        let mut shapes: Vec<(String, &str)> = Vec::new();

        for resource in resources {
            let full_path = format!("{parent}{}", resource.path);

            if !resource.path.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("resource path: {full_path}"),
                    message: "Resource paths must start with '/'".to_string(),
                });
            }

            match PathPattern::parse(&resource.path) {
                Ok(pattern) => {
                    let shape = pattern.shape();
                    if let Some((_, other)) = shapes.iter().find(|(seen, _)| *seen == shape) {
                        errors.push(ValidationError::RouteConflict {
                            message: format!(
                                "Sibling resources '{other}' and '{}' under '{}' have the same path pattern",
                                resource.path,
                                if parent.is_empty() { "/" } else { parent }
                            ),
                        });
                    } else {
                        shapes.push((shape, resource.path.as_str()));
                    }
                }
                Err(message) => errors.push(ValidationError::InvalidPattern {
                    pattern: full_path.clone(),
                    message,
                }),
            }

            if let Err(e) = parse_timeout(
                resource.timeout.as_deref(),
                &format!("resource '{full_path}' timeout"),
            ) {
                errors.push(e);
            }

            let full_shape = PathPattern::parse(&full_path).ok().map(|p| p.shape());
            let mut verbs = HashSet::new();
            for method in &resource.methods {
                if !verbs.insert(method.http_verb) {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "Resource '{full_path}' declares {} more than once",
                            method.http_verb
                        ),
                    });
                } else if let Some(shape) = &full_shape {
                    if !routes.insert((shape.clone(), method.http_verb)) {
                        errors.push(ValidationError::RouteConflict {
                            message: format!(
                                "Route '{} {full_path}' is declared more than once",
                                method.http_verb
                            ),
                        });
                    }
                }
                Self::validate_method(method, &full_path, definitions, errors);
            }

            Self::validate_resources(
                &resource.resources,
                full_path.trim_end_matches('/'),
                definitions,
                routes,
                errors,
            );
        }
    }

    fn validate_method(
        method: &Method,
        path: &str,
        definitions: &HashSet<&str>,
        errors: &mut Vec<ValidationError>,
    ) {
        let context = format!("method {} {path}", method.http_verb);

        if let Err(e) = parse_timeout(method.timeout.as_deref(), &format!("{context} timeout")) {
            errors.push(e);
        }

        for body in &method.inbound_request.request_body {
            if !definitions.contains(body.definition_name.as_str()) {
                errors.push(ValidationError::UnknownReference {
                    kind: format!("definition ({context})"),
                    name: body.definition_name.clone(),
                });
            }
        }

        if let Err(e) = Self::validate_integration(&method.integration_request, &context) {
            errors.push(e);
        }
    }

    /// Backend settings must match the integration request type.
    fn validate_integration(integration: &IntegrationRequest, context: &str) -> ValidationResult<()> {
        match integration.request_type {
            RequestType::Dubbo => {
                let Some(dubbo) = &integration.dubbo_backend_config else {
                    return Err(ValidationError::MissingField {
                        field: format!("{context} integration_request.dubbo_backend_config"),
                    });
                };
                if dubbo.interface.is_empty() || dubbo.method.is_empty() {
                    return Err(ValidationError::InvalidField {
                        field: format!("{context} dubbo_backend_config"),
                        message: "Both 'interface' and 'method' are required".to_string(),
                    });
                }
            }
            RequestType::Http => {
                if let Some(backend) = &integration.http_backend_config {
                    if !backend.url.is_empty() {
                        Self::validate_url(&backend.url, &format!("{context} http_backend_config.url"))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url_str.parse::<http::Uri>() {
            Ok(uri) => {
                match uri.scheme_str() {
                    Some("http" | "https") => {}
                    _ => {
                        return Err(ValidationError::InvalidField {
                            field: context.to_string(),
                            message: format!("URL must use http or https scheme: '{url_str}'"),
                        });
                    }
                }
                if uri.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!("URL must have a host: '{url_str}'"),
                    });
                }
                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL '{url_str}': {e}"),
            }),
        }
    }

    /// Group names must be unique, and every plugin needs a name.
    fn validate_plugins(config: &ApiConfig, errors: &mut Vec<ValidationError>) {
        let mut groups = HashSet::new();
        for group in &config.plugins_group {
            if group.group_name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "plugins_group.group_name".to_string(),
                });
            } else if !groups.insert(group.group_name.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: "plugins_group.group_name".to_string(),
                    message: format!("Duplicate plugins group '{}'", group.group_name),
                });
            }
            for plugin in &group.plugins {
                if plugin.name.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: format!("plugins_group '{}' plugin name", group.group_name),
                    });
                }
            }
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
