use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::ApiConfig, validation::ApiConfigValidator};

/// Load and validate an API configuration document.
/// Supports YAML, JSON and TOML, picked by extension (YAML otherwise).
pub async fn load_config(config_path: &str) -> Result<ApiConfig> {
    let config = load_config_sync(config_path)?;
    ApiConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Load configuration synchronously, without validation
pub fn load_config_sync(config_path: &str) -> Result<ApiConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let api_config: ApiConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    tracing::debug!(
        path = %config_path.display(),
        resources = api_config.resources.len(),
        "configuration file loaded"
    );
    Ok(api_config)
}

/// Load configuration without validation (used by the validate command to report every
/// problem at once)
pub async fn load_config_unchecked(config_path: &str) -> Result<ApiConfig> {
    load_config_sync(config_path)
}
