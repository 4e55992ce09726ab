// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use magents_core::domain::config::{MagentsConfig, CONFIG_PATH_ENV};

use super::print_json;
use crate::Globals;

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./magents-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, globals: &Globals) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(globals, paths),
        ConfigCommand::Validate { file } => validate(file.or_else(|| globals.config_path.clone())),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(globals: &Globals, show_paths: bool) -> Result<()> {
    let config =
        MagentsConfig::load_or_default(globals.config_path.clone()).context("Failed to load configuration")?;

    if globals.json {
        return print_json(&config);
    }

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &globals.config_path {
            Some(path) => println!("  --config flag: {}", path.display()),
            None => println!("  --config flag: {}", "(not set)".dimmed()),
        }
        if std::env::var(CONFIG_PATH_ENV).is_err() {
            println!("  {}: {}", CONFIG_PATH_ENV, "(not set)".dimmed());
        }
        for path in MagentsConfig::search_paths() {
            let marker = if path.exists() { "found".green() } else { "missing".dimmed() };
            println!("  {} ({})", path.display(), marker);
        }
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Agents:".bold());
    println!("  Max agents: {} global, {} per new project", spec.agents.max_agents, spec.agents.project_max_agents);
    println!("  Handle prefix: {}", spec.agents.handle_prefix);
    println!("  Default branch: {}", spec.agents.default_branch);
    println!("  State dir: {}", config.state_dir().display());
    println!();

    println!("{}", "Runtime:".bold());
    println!(
        "  Docker socket: {}",
        spec.runtime.docker_socket_path.as_deref().unwrap_or("(auto-detect)")
    );
    println!("  Default image: {}", spec.runtime.default_image);
    println!("  Auth volume: {} → {}", spec.runtime.auth_volume, spec.runtime.auth_image);
    println!("  Bridge socket: {}", spec.runtime.bridge_socket_path.as_deref().unwrap_or("(disabled)"));
    println!("  Stop timeout: {}s", spec.runtime.stop_timeout_secs);
    println!();

    println!("{}", "Session:".bold());
    println!("  Agent command: {}", spec.session.agent_command.as_deref().unwrap_or("(none)"));
    println!("  Workspace dir: {}", spec.session.workspace_dir);
    println!();

    println!("{}", "Health:".bold());
    println!("  Timeout: {}s, poll every {}ms", spec.health.timeout_secs, spec.health.poll_interval_ms);
    println!();

    println!("{}", "Registry:".bold());
    println!("  Backend: {:?}", spec.registry.backend);
    println!("  Database: {}", config.database_path().display());
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = MagentsConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    std::fs::write(&output, MINIMAL_TEMPLATE).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
