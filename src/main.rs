use std::{path::Path, sync::Arc};

use axon_dispatch::{
    adapters::{GovernorRateLimitBackend, UnavailableBackendClient},
    config::{ApiConfigValidator, HttpVerb, load_config, loader::load_config_unchecked},
    core::{ApiRegistry, DispatchService, RequestInfo, Resolution, RouteTable},
    filters::{BuiltinServices, builtin_registry},
    metrics, tracing_setup,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use http::{Method, Uri};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Log filter, e.g. "info" or "axon_dispatch=debug"
    #[clap(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate an API configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "api_config.yaml")]
        config: String,
    },
    /// Resolve a request against a configuration and show what would run
    Resolve {
        #[clap(short, long, default_value = "api_config.yaml")]
        config: String,

        /// HTTP method of the request
        #[clap(short, long, default_value = "GET")]
        method: String,

        /// Request path, optionally with a query string
        path: String,

        /// Also run the bound filter chain. Backend calls fail with 502.
        #[clap(long)]
        dispatch: bool,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "api_config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    tracing_setup::init_tracing_with_config(&args.log_level, args.json_logs, false)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics();

    match args.command {
        Commands::Validate { config } => validate_config_command(&config).await,
        Commands::Resolve {
            config,
            method,
            path,
            dispatch,
        } => resolve_command(&config, &method, &path, dispatch).await,
        Commands::Init { config } => init_config_command(&config).await,
    }
}

fn builtin_services() -> BuiltinServices {
    BuiltinServices {
        backend: Arc::new(UnavailableBackendClient),
        rate_limiter: Arc::new(GovernorRateLimitBackend::new()),
    }
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ApiConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        println!();
        println!("💡 Common fixes:");
        println!("   • Start every resource path with '/'");
        println!("   • Use durations such as '500ms' or '3s' for timeouts");
        println!("   • Give each rate-limit group at most one enabled rule");
        std::process::exit(1);
    }
    println!("✅ Configuration validation: OK");

    let filters = builtin_registry(builtin_services());
    match RouteTable::build(Arc::new(config), &filters) {
        Ok(table) => {
            println!("✅ Filter binding: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • APIs: {}", table.api_names().len());
            for name in table.api_names() {
                println!("     - {name}");
            }
            println!(
                "   • Rate limit groups: {}",
                table.config().rate_limit.resources.len()
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Filter binding failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn resolve_command(config_path: &str, method: &str, path: &str, dispatch: bool) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{method}'"))?;
    let uri: Uri = path
        .parse()
        .with_context(|| format!("Invalid request path '{path}'"))?;

    let config = Arc::new(load_config(config_path).await?);
    let filters = Arc::new(builtin_registry(builtin_services()));
    let table = RouteTable::build(Arc::clone(&config), &filters)
        .context("Failed to build route table")?;

    let request_path = uri.path();
    match table.resolve(request_path, HttpVerb::from(&method)) {
        Resolution::Matched(route) => {
            println!("✅ {method} {request_path} -> {}", route.api_name());
            println!("   • Timeout: {:?}", route.method.timeout);
            println!("   • Mock: {}", route.method.mock);
            let mut params: Vec<_> = route.params.iter().collect();
            params.sort();
            for (name, value) in params {
                println!("   • Param {name} = {value}");
            }
            println!("   • Filters: {}", route.method.filter_names().join(" -> "));
        }
        Resolution::MethodNotAllowed { path } => {
            println!("⛔ {method} is not allowed for {path}");
        }
        Resolution::NotFound => {
            println!("❓ No resource matches {request_path}");
        }
    }
    match table.classify(request_path) {
        Some(classification) => println!(
            "   • Rate limit group: {} (rule {})",
            classification.group,
            if classification.rule.is_some() {
                "enabled"
            } else {
                "none"
            }
        ),
        None => println!("   • Rate limit group: none"),
    }

    if dispatch {
        let service = DispatchService::new(config, Arc::new(ApiRegistry::new()), filters)
            .await
            .context("Failed to start dispatch service")?;
        let response = service.dispatch(RequestInfo::new(method, uri)).await;
        println!();
        println!("📨 Response: {}", response.status);
        for (name, value) in &response.headers {
            println!("   {name}: {}", value.to_str().unwrap_or("<binary>"));
        }
        if !response.body.is_empty() {
            println!("   {}", String::from_utf8_lossy(&response.body));
        }
    }
    Ok(())
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Axon dispatch API configuration
name: example
description: Example API configuration

# Settings shared by every method, keyed by filter name
filter_configs:
  auth:
    header: x-api-key
    keys: [change-me]

resources:
  - path: /users
    type: Restful
    timeout: 3s
    filters: [access_log]
    methods:
      - http_verb: GET
        enable: true
        filters: [rate_limit, integration]
        integration_request:
          request_type: http
          http_backend_config:
            url: http://localhost:3000
            path: /users
      - http_verb: POST
        enable: true
        timeout: 1s
        filters: [auth, integration]
        integration_request:
          request_type: http
          http_backend_config:
            url: http://localhost:3000
            path: /users
    resources:
      - path: /{id}
        methods:
          - http_verb: GET
            enable: true
            mock: true
            filters: [integration]
            filter_configs:
              integration:
                mock:
                  status: 200
                  body: { id: 1, name: mock }

rate_limit:
  resources:
    - name: users
      items:
        - match_strategy: ANT_PATH
          pattern: /users/**
        - match_strategy: EXACT
          pattern: /users
  rules:
    - resource: users
      enable: true
      flow_rule:
        count: 100
        stat_interval_ms: 1000
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'axon-dispatch validate --config {config_path}' to check it");
    Ok(())
}
