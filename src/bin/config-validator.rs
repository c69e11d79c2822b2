//! # Gateway Configuration Validator
//!
//! Command-line tool for validating gateway configuration across environments.
//! Catches unknown services, malformed path templates and bad tuning values
//! before the client ships with them.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use diabetactic_gateway::config::{ConfigManager, GatewayConfig};
use diabetactic_gateway::registry::EndpointRegistry;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "gateway-config-validator")]
#[command(about = "Validate Diabetactic gateway configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole configuration and summarize it
    All,

    /// List configured services
    Services,

    /// List logical endpoints and where they route
    Endpoints,

    /// Print the merged configuration with secrets masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|manager| match &cli.command {
        Some(Commands::All) | None => validate_all(&cli, &manager),
        Some(Commands::Services) => list_services(&cli, manager.config()),
        Some(Commands::Endpoints) => list_endpoints(&cli, manager.config()),
        Some(Commands::Show) => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
            Ok(())
        }
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate_all(cli: &Cli, manager: &ConfigManager) -> Result<()> {
    let config = manager.config();
    let registry = EndpointRegistry::from_config(config).context("building endpoint registry")?;

    if cli.format == OutputFormat::Json {
        let summary = json!({
            "environment": manager.environment(),
            "config_directory": manager.config_directory().display().to_string(),
            "services": config.services.len(),
            "endpoints": registry.len(),
            "valid": true,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("🔧 Validating Gateway Configuration");
    println!("Environment: {}", manager.environment());
    println!("Config Directory: {}", manager.config_directory().display());
    println!();
    println!("✅ Configuration loaded and validated");
    println!("✅ {} services, {} endpoints", config.services.len(), registry.len());

    for service in &config.services {
        if registry
            .endpoint_keys()
            .iter()
            .all(|key| registry.service_for_endpoint(key) != Some(service.id.as_str()))
        {
            println!("   ⚠️  Service '{}' has no endpoints", service.id);
        }
    }

    if config.backoff.base_delay_ms > config.backoff.max_delay_ms {
        bail!(
            "backoff.base_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
            config.backoff.base_delay_ms,
            config.backoff.max_delay_ms
        );
    }

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn list_services(cli: &Cli, config: &GatewayConfig) -> Result<()> {
    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config.services)?);
        return Ok(());
    }

    println!(
        "{:<14} {:<34} {:>8} {:>8} {:>10} {:>9}",
        "SERVICE", "BASE URL", "TIMEOUT", "RETRIES", "THRESHOLD", "FALLBACK"
    );
    for service in &config.services {
        println!(
            "{:<14} {:<34} {:>6}ms {:>8} {:>10} {:>9}",
            service.id,
            service.base_url,
            service.timeout_ms,
            service.max_retries,
            service.breaker_failure_threshold,
            if service.supports_offline_fallback { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn list_endpoints(cli: &Cli, config: &GatewayConfig) -> Result<()> {
    let registry = EndpointRegistry::from_config(config)?;

    if cli.format == OutputFormat::Json {
        let endpoints: Vec<_> = registry
            .endpoint_keys()
            .into_iter()
            .filter_map(|key| registry.get(key))
            .map(|def| {
                json!({
                    "key": def.key,
                    "service": def.service_id,
                    "method": def.method,
                    "path": def.path.as_str(),
                    "auth": def.auth,
                    "idempotent": def.idempotent,
                    "cache_ttl_ms": def.cache.as_ref().map(|c| c.ttl.as_millis() as u64),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
        return Ok(());
    }

    println!(
        "{:<28} {:<14} {:<7} {:<40} {:<17} {:>9}",
        "ENDPOINT", "SERVICE", "METHOD", "PATH", "AUTH", "CACHE"
    );
    for key in registry.endpoint_keys() {
        let Some(def) = registry.get(key) else {
            continue;
        };
        let cache = def
            .cache
            .as_ref()
            .map(|c| format!("{}ms", c.ttl.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:<14} {:<7} {:<40} {:<17} {:>9}",
            def.key,
            def.service_id,
            def.method.as_str(),
            def.path.as_str(),
            def.auth.to_string(),
            cache
        );
    }
    Ok(())
}
