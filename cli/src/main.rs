// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # magents CLI
//!
//! The `magents` binary runs the lifecycle orchestrator in-process against
//! the local Docker daemon and the shared SQLite registry.
//!
//! ## Commands
//!
//! - `magents agent create|attach|stop|cleanup|list|show|reconcile|import` - Agent lifecycle
//! - `magents project list|show` - Project inspection
//! - `magents config show|validate|generate` - Configuration management
//! - `magents serve` - HTTP API
//!
//! Failed operations exit with the code of their error variant (see
//! `OrchestratorError::exit_code`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use magents_cli::commands::{self, AgentCommand, ConfigCommand, ProjectCommand, ServeArgs};
use magents_cli::Globals;
use magents_core::domain::config::MagentsConfig;
use magents_core::OrchestratorError;

/// magents - containerised development agents, one per branch
#[derive(Parser)]
#[command(name = "magents")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "MAGENTS_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to spec.logging.level
    #[arg(long, global = true, env = "MAGENTS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Agent lifecycle
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Project inspection
    #[command(name = "project")]
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Serve the HTTP API
    #[command(name = "serve")]
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // API keys for agents are commonly kept in a project .env
    let _ = dotenvy::dotenv();

    // A broken config file is reported by the command itself
    let logging = MagentsConfig::load_or_default(cli.config.clone())
        .map(|config| config.spec.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    if let Err(e) = init_logging(&level, logging.format == "json") {
        eprintln!("{}", format!("Error: {:#}", e).red());
        return ExitCode::FAILURE;
    }

    let Some(command) = cli.command else {
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        return ExitCode::FAILURE;
    };

    let globals = Globals { config_path: cli.config, json: cli.json };
    let result = match command {
        Commands::Agent { command } => commands::agent::handle_command(command, &globals).await,
        Commands::Project { command } => commands::project::handle_command(command, &globals).await,
        Commands::Config { command } => commands::config::handle_command(command, &globals).await,
        Commands::Serve(args) => commands::serve::handle_command(args, &globals).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", format!("Error: {:#}", e).red());
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<OrchestratorError>() {
        Some(e) => ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
