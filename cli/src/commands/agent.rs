// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent lifecycle commands
//!
//! Commands: create, attach, stop, cleanup, list, show, reconcile, import

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use magents_core::{
    application::{
        config_resolver::ConfigOverrides,
        lifecycle::{AgentView, AttachTarget, CleanupReport, ListFilter, ReconcileReport, StopOutcome},
    },
    domain::{
        agent::{AgentId, AgentStatus},
        errors::OrchestratorError,
    },
    infrastructure::legacy_import::{default_legacy_path, read_legacy_registry},
    CreateOptions, LifecycleOrchestrator,
};

use super::print_json;
use crate::embedded::{build_orchestrator, load_config, Progress};
use crate::Globals;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Create an agent container for a branch and bootstrap its tmux session
    Create {
        /// Branch the agent works on (default: spec.agents.default_branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Agent id (default: generated)
        #[arg(long)]
        id: Option<String>,

        /// Repository the agent works in
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Container image (skips the auth-volume image selection)
        #[arg(long)]
        image: Option<String>,

        /// Extra environment variable for the container
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// CPU limit in thousandths of a core
        #[arg(long)]
        cpu_millis: Option<u32>,

        /// Memory limit in MiB
        #[arg(long)]
        memory_mb: Option<u64>,

        /// Command typed into the primary tmux window
        #[arg(long)]
        agent_command: Option<String>,

        /// Attach to the session once the agent is ready
        #[arg(short, long)]
        attach: bool,
    },

    /// Start the agent if needed and open its tmux session
    Attach {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,

        /// Print the attach command instead of running it
        #[arg(long)]
        print_only: bool,
    },

    /// Stop an agent's container
    Stop {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,

        /// Also remove the container and the registry record
        #[arg(long)]
        remove: bool,
    },

    /// Stop every agent
    Cleanup {
        /// Also remove containers and registry records
        #[arg(long)]
        remove: bool,
    },

    /// List agents
    List {
        /// Only agents of the project at this path
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Only agents with this status (running, stopped, error)
        #[arg(short, long)]
        status: Option<AgentStatus>,
    },

    /// Show one agent with its live container state
    Show {
        #[arg(value_name = "AGENT_ID")]
        agent_id: String,
    },

    /// Compare the registry with the running containers
    Reconcile {
        /// Remove orphan containers and repair project membership
        #[arg(long)]
        fix_orphaned: bool,
    },

    /// Import agents from the legacy docker_agents.json registry
    Import {
        /// Legacy registry file (default: <state_dir>/docker_agents.json)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_agent_id(raw: &str) -> Result<AgentId> {
    Ok(AgentId::parse(raw).map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?)
}

pub async fn handle_command(command: AgentCommand, globals: &Globals) -> Result<()> {
    let config = load_config(globals.config_path.clone())?;
    let default_branch = config.spec.agents.default_branch.clone();
    let state_dir = config.state_dir();
    let orchestrator = build_orchestrator(config).await?;

    match command {
        AgentCommand::Create { branch, id, project, image, env, cpu_millis, memory_mb, agent_command, attach } => {
            let options = CreateOptions {
                id,
                branch: branch.unwrap_or(default_branch),
                project_path: project,
                overrides: ConfigOverrides {
                    image,
                    env: env.into_iter().collect::<BTreeMap<_, _>>(),
                    cpu_millis,
                    memory_bytes: memory_mb.map(|mb| mb * 1024 * 1024),
                    agent_command,
                },
            };
            create(&orchestrator, options, attach, globals.json).await
        }
        AgentCommand::Attach { agent_id, print_only } => {
            attach(&orchestrator, &parse_agent_id(&agent_id)?, print_only, globals.json).await
        }
        AgentCommand::Stop { agent_id, remove } => {
            stop(&orchestrator, &parse_agent_id(&agent_id)?, remove, globals.json).await
        }
        AgentCommand::Cleanup { remove } => cleanup(&orchestrator, remove, globals.json).await,
        AgentCommand::List { project, status } => {
            list(&orchestrator, ListFilter { project_path: project, status }, globals.json).await
        }
        AgentCommand::Show { agent_id } => show(&orchestrator, &parse_agent_id(&agent_id)?, globals.json).await,
        AgentCommand::Reconcile { fix_orphaned } => reconcile(&orchestrator, fix_orphaned, globals.json).await,
        AgentCommand::Import { file } => {
            let path = file.unwrap_or_else(|| default_legacy_path(&state_dir));
            import(&orchestrator, path, globals.json).await
        }
    }
}

async fn create(orchestrator: &LifecycleOrchestrator, options: CreateOptions, then_attach: bool, json: bool) -> Result<()> {
    println!(
        "Creating agent on {} in {}",
        options.branch.bold(),
        options.project_path.display()
    );

    // Ctrl+C ends the readiness wait; the container is rolled back
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let progress = Progress::start(orchestrator.events());
    let result = orchestrator.create_with_cancel(options, &cancel).await;
    progress.finish().await;
    signal_task.abort();

    let created = result?;
    if json {
        print_json(&created)?;
    } else {
        println!(
            "{}",
            format!("✓ Agent {} running in container {}", created.agent.id, created.agent.handle).green()
        );
        println!("  Project: {} ({})", created.project.name.bold(), created.project.id);
        if let Some(image) = &created.image {
            println!("  Image:   {}", image);
        }
        println!("  Attach:  {}", created.attach.command.join(" ").dimmed());
    }

    if then_attach {
        run_attach(&created.attach).await?;
    }
    Ok(())
}

async fn attach(orchestrator: &LifecycleOrchestrator, agent_id: &AgentId, print_only: bool, json: bool) -> Result<()> {
    let progress = Progress::start(orchestrator.events());
    let result = orchestrator.attach(agent_id).await;
    progress.finish().await;
    let target = result?;

    if json {
        return print_json(&target);
    }
    if print_only {
        println!("{}", target.command.join(" "));
        return Ok(());
    }
    run_attach(&target).await
}

/// Hand the terminal to `docker exec -it ... tmux attach-session`.
async fn run_attach(target: &AttachTarget) -> Result<()> {
    let Some((program, args)) = target.command.split_first() else {
        anyhow::bail!("empty attach command for agent {}", target.agent_id);
    };

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", program))?;

    if !status.success() {
        warn!(agent_id = %target.agent_id, ?status, "Attach command exited unsuccessfully");
        anyhow::bail!("{} exited with {}", target.command.join(" "), status);
    }
    Ok(())
}

async fn stop(orchestrator: &LifecycleOrchestrator, agent_id: &AgentId, remove: bool, json: bool) -> Result<()> {
    let outcome = orchestrator.stop(agent_id, remove).await?;
    if json {
        return print_json(&outcome);
    }
    match outcome {
        StopOutcome::Stopped { agent } => println!("{}", format!("✓ Agent {} stopped", agent.id).green()),
        StopOutcome::Removed { agent_id } => println!("{}", format!("✓ Agent {} removed", agent_id).green()),
    }
    Ok(())
}

async fn cleanup(orchestrator: &LifecycleOrchestrator, remove: bool, json: bool) -> Result<()> {
    match orchestrator.cleanup_all(remove).await {
        Ok(report) => {
            if json {
                return print_json(&report);
            }
            print_cleanup(&report, remove);
            Ok(())
        }
        Err(OrchestratorError::PartialFailure { succeeded, failures }) => {
            if json {
                print_json(&serde_json::json!({ "succeeded": succeeded, "failures": failures }))?;
            } else {
                for failure in &failures {
                    println!("{}", format!("✗ {}: {}", failure.id, failure.message).red());
                }
                println!("{} agent(s) cleaned up, {} failed", succeeded, failures.len());
            }
            Err(OrchestratorError::PartialFailure { succeeded, failures }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_cleanup(report: &CleanupReport, removed: bool) {
    let verb = if removed { "removed" } else { "stopped" };
    if report.succeeded.is_empty() && report.failures.is_empty() {
        println!("{}", "No agents to clean up".yellow());
        return;
    }
    for id in &report.succeeded {
        println!("{}", format!("✓ {} {}", id, verb).green());
    }
    for failure in &report.failures {
        println!("{}", format!("✗ {}: {}", failure.id, failure.message).red());
    }
}

async fn list(orchestrator: &LifecycleOrchestrator, filter: ListFilter, json: bool) -> Result<()> {
    let agents = orchestrator.list(&filter).await?;
    if json {
        return print_json(&agents);
    }

    if agents.is_empty() {
        println!("{}", "No agents found".yellow());
        return Ok(());
    }

    println!("{} agents found:", agents.len());
    println!("{:<20} {:<24} {:<8} {:<18} {:<28} {}", "ID", "BRANCH", "STATUS", "CONTAINER", "PROJECT", "CREATED");
    for view in &agents {
        print_row(view);
    }
    Ok(())
}

fn print_row(view: &AgentView) {
    let agent = &view.agent;
    println!(
        "{:<20} {:<24} {:<8} {:<18} {:<28} {}",
        agent.id.to_string().bold(),
        agent.branch,
        colored_status(agent.status),
        view.container_status,
        agent.project_id,
        agent.created_at.format("%Y-%m-%d %H:%M")
    );
}

fn colored_status(status: AgentStatus) -> colored::ColoredString {
    match status {
        AgentStatus::Running => status.as_str().green(),
        AgentStatus::Stopped => status.as_str().yellow(),
        AgentStatus::Error => status.as_str().red(),
        AgentStatus::Removed => status.as_str().dimmed(),
    }
}

async fn show(orchestrator: &LifecycleOrchestrator, agent_id: &AgentId, json: bool) -> Result<()> {
    let view = orchestrator.show(agent_id).await?;
    if json {
        return print_json(&view);
    }

    let agent = &view.agent;
    println!("{}", format!("Agent {}", agent.id).bold());
    println!("  Branch:     {}", agent.branch);
    println!("  Status:     {}", colored_status(agent.status));
    println!("  Project:    {}", agent.project_id);
    println!("  Workspace:  {}", agent.workspace_path.display());
    println!("  Container:  {} ({})", agent.handle, view.container_status);
    if let Some(image) = view.container.as_ref().and_then(|c| c.image.as_deref()) {
        println!("  Image:      {}", image);
    }
    println!("  Created:    {}", agent.created_at.to_rfc3339());
    println!("  Updated:    {}", agent.updated_at.to_rfc3339());
    Ok(())
}

async fn reconcile(orchestrator: &LifecycleOrchestrator, fix: bool, json: bool) -> Result<()> {
    let report = orchestrator.reconcile(fix).await?;
    if json {
        return print_json(&report);
    }
    print_reconcile(&report);
    if !report.failures.is_empty() {
        anyhow::bail!("{} repair(s) failed", report.failures.len());
    }
    Ok(())
}

fn print_reconcile(report: &ReconcileReport) {
    if report.is_clean() {
        println!("{}", "✓ Registry and containers agree".green());
        return;
    }

    let action = |fixed: &str, found: &str| if report.fixed { fixed.to_string() } else { found.to_string() };

    for handle in &report.orphan_containers {
        println!("{} orphan container {}", action("removed", "found").yellow(), handle.bold());
    }
    for m in &report.unlisted_agents {
        println!("{} agent {} in project {}", action("listed", "unlisted").yellow(), m.agent_id.bold(), m.project_id);
    }
    for m in &report.agents_missing_project {
        println!("{} agent {} refers to missing project {}", "found".yellow(), m.agent_id.bold(), m.project_id);
    }
    for m in &report.dangling_agent_ids {
        println!(
            "{} unknown agent id {} in project {}",
            action("pruned", "found").yellow(),
            m.agent_id.bold(),
            m.project_id
        );
    }
    for id in &report.agents_missing_container {
        println!(
            "{} agent {} has no container",
            action("marked ERROR:", "found").yellow(),
            id.to_string().bold()
        );
    }
    for failure in &report.failures {
        println!("{}", format!("✗ {}: {}", failure.id, failure.message).red());
    }

    if !report.fixed {
        println!();
        println!("{} issue(s). Run 'magents agent reconcile --fix-orphaned' to repair.", report.issue_count());
    }
}

async fn import(orchestrator: &LifecycleOrchestrator, path: PathBuf, json: bool) -> Result<()> {
    let records = read_legacy_registry(&path)?;
    if !json {
        println!("Importing {} legacy record(s) from {}", records.len(), path.display());
    }

    let report = orchestrator.import_legacy(records).await?;
    if json {
        return print_json(&report);
    }
    for id in &report.imported {
        println!("{}", format!("✓ imported {}", id).green());
    }
    for id in &report.skipped {
        println!("{}", format!("· skipped {} (already registered)", id).dimmed());
    }
    for failure in &report.failures {
        println!("{}", format!("✗ {}: {}", failure.id, failure.message).red());
    }
    Ok(())
}
