//! # Enrichment Configuration Validator
//!
//! Loads configuration the same way a running process would, validates it,
//! and prints the effective values with secrets masked.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use enrichment_core::config::{ConfigManager, GuardConfig};
use enrichment_core::logging::init_structured_logging;
use std::path::PathBuf;
use std::process;
use tracing::error;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Summary,
}

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate enrichment guardrail configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); ENRICHMENT__* overrides still apply
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment name (defaults to ENRICHMENT_ENV / APP_ENV / development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Read the flat operator variables (RATE_LIMIT_RPS, DAILY_BUDGET_CAP_CENTS, ...) instead
    #[arg(long, conflicts_with = "config")]
    from_env: bool,

    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);

    if cli.from_env {
        let config = GuardConfig::from_env().context("reading environment variables")?;
        return ConfigManager::from_config(config, &environment).context("validating configuration");
    }

    ConfigManager::load_from(cli.config.as_deref(), &environment).context("loading configuration")
}

fn print_summary(manager: &ConfigManager) {
    let config = manager.config();
    println!("environment:          {}", manager.environment());
    if let Some(path) = manager.source_file() {
        println!("source file:          {}", path.display());
    }
    println!("rate limit:           {} req/s", config.rate_limit.requests_per_second);
    println!(
        "circuit breaker:      open at {:.0}% errors over >= {} samples, probe after {}ms",
        config.circuit_breaker.error_rate_threshold * 100.0,
        config.circuit_breaker.min_samples,
        config.circuit_breaker.half_open_cooldown_ms
    );
    if config.budget.daily_cap_cents == 0 {
        println!("daily budget:         unlimited");
    } else {
        println!("daily budget:         {} cents", config.budget.daily_cap_cents);
    }
    println!("job max attempts:     {}", config.jobs.default_max_attempts);
    println!("webhook max attempts: {}", config.webhook.max_attempts);
    println!(
        "durable store:        {}",
        if config.database.url.is_some() { "postgres" } else { "in-memory" }
    );
}

fn main() {
    init_structured_logging();
    let cli = Cli::parse();

    let manager = match load(&cli) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Configuration is invalid");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    };

    match cli.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&manager.sanitized()) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ failed to render configuration: {e}");
                process::exit(1);
            }
        },
        OutputFormat::Summary => print_summary(&manager),
    }
    eprintln!("✅ configuration is valid");
}
