// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Project inspection commands
//!
//! Commands: list, show

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use magents_core::application::lifecycle::ListFilter;
use magents_core::domain::errors::OrchestratorError;
use magents_core::domain::project::Project;

use super::print_json;
use crate::embedded::{build_orchestrator, load_config};
use crate::Globals;

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// List registered projects
    List,

    /// Show the project registered for a path, with its agents
    Show {
        /// Project directory
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,
    },
}

pub async fn handle_command(command: ProjectCommand, globals: &Globals) -> Result<()> {
    let config = load_config(globals.config_path.clone())?;
    let orchestrator = build_orchestrator(config).await?;

    match command {
        ProjectCommand::List => {
            let projects = orchestrator.list_projects().await?;
            if globals.json {
                return print_json(&projects);
            }
            if projects.is_empty() {
                println!("{}", "No projects found".yellow());
                return Ok(());
            }

            println!("{} projects found:", projects.len());
            println!("{:<28} {:<16} {:<8} {:<10} {}", "ID", "NAME", "AGENTS", "TYPE", "PATH");
            for project in &projects {
                println!(
                    "{:<28} {:<16} {:<8} {:<10} {}",
                    project.id.to_string().bold(),
                    project.name,
                    format!("{}/{}", project.agent_ids.len(), project.max_agents),
                    project.project_type.as_ref().map(|t| t.language.as_str()).unwrap_or("-"),
                    project.path.display()
                );
            }
            Ok(())
        }
        ProjectCommand::Show { path } => {
            let project = orchestrator.find_project(&path).await?.ok_or_else(|| OrchestratorError::NotFound {
                kind: "project",
                id: path.display().to_string(),
            })?;
            let agents = orchestrator
                .list(&ListFilter { project_path: Some(project.path.clone()), status: None })
                .await?;

            if globals.json {
                return print_json(&serde_json::json!({ "project": project, "agents": agents }));
            }

            print_project(&project);
            if agents.is_empty() {
                println!("  Agents:      {}", "(none)".dimmed());
            } else {
                println!("  Agents:");
                for view in &agents {
                    println!(
                        "    {} {} on {} ({})",
                        "-".dimmed(),
                        view.agent.id.to_string().bold(),
                        view.agent.branch,
                        view.agent.status
                    );
                }
            }
            Ok(())
        }
    }
}

fn print_project(project: &Project) {
    println!("{}", format!("Project {}", project.name).bold());
    println!("  ID:          {}", project.id);
    println!("  Path:        {}", project.path.display());
    println!("  Status:      {}", project.status.as_str());
    println!("  Max agents:  {}", project.max_agents);
    if let Some(project_type) = &project.project_type {
        let mut described = project_type.language.clone();
        if let Some(pm) = &project_type.package_manager {
            described.push_str(&format!(" ({})", pm));
        }
        if !project_type.frameworks.is_empty() {
            described.push_str(&format!(", {}", project_type.frameworks.join(", ")));
        }
        println!("  Type:        {}", described);
    }
    println!("  Version:     {}", project.version);
}
