//! # Conduit Configuration Validator
//!
//! Command-line tool for validating Conduit configuration files before a
//! runtime is started with them.

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conduit_core::config::{ConduitConfig, ConfigManager};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate Conduit configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, default_value = "config/conduit.toml")]
    config: PathBuf,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the whole file
    All,

    /// Validate one section
    Component {
        /// connections, channels, workflow or poller
        name: String,
    },

    /// Print the effective configuration, defaults and environment overrides applied
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

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Component { name }) => validate_component(&cli, name),
        Some(Commands::Show) => show(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("Configuration invalid: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<ConduitConfig> {
    let manager = ConfigManager::load_from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    Ok(manager.config().clone())
}

fn validate_all(cli: &Cli) -> Result<()> {
    let config = load(cli)?;

    if cli.format == "json" {
        let summary = serde_json::json!({
            "file": cli.config.display().to_string(),
            "valid": true,
            "connections": sorted(config.connections.keys()),
            "channels": sorted(config.channels.keys()),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Validating {}", cli.config.display());
    for name in sorted(config.connections.keys()) {
        let connection = &config.connections[&name];
        println!(
            "  connection {name}: retry every {}ms, max attempts {}, check interval {}",
            connection.retry_interval_ms,
            connection
                .max_attempts
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            connection
                .error_handler
                .check_interval_ms
                .map_or_else(|| "off".to_string(), |ms| format!("{ms}ms")),
        );
    }
    for name in sorted(config.channels.keys()) {
        let channel = &config.channels[&name];
        println!(
            "  channel {name}: connection {}, auto_start {}",
            channel.connection, channel.auto_start
        );
    }
    println!(
        "  workflow: strict {}, rollback wait {}ms",
        config.workflow.strict, config.workflow.rollback_wait_ms
    );
    println!("All configuration validation checks passed");
    Ok(())
}

fn validate_component(cli: &Cli, name: &str) -> Result<()> {
    let config = load(cli)?;
    match name.to_lowercase().as_str() {
        "connections" => {
            for (connection_name, connection) in &config.connections {
                connection.validate(connection_name)?;
            }
        }
        "channels" => {
            if config.channels.is_empty() {
                bail!("no channels declared");
            }
        }
        "workflow" => config.workflow.validate()?,
        "poller" => config.poller.validate()?,
        other => bail!("Unknown component: {other}"),
    }
    println!("Component '{name}' validation passed");
    Ok(())
}

fn show(cli: &Cli) -> Result<()> {
    let config = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.cloned().collect();
    keys.sort();
    keys
}
