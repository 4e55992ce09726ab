// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process wiring of the lifecycle orchestrator
//!
//! Every CLI invocation builds its own orchestrator against the local Docker
//! daemon and the registry named by the configuration. Concurrent
//! invocations coordinate through the registry's compare-and-swap writes.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use magents_core::{
    application::{
        config_resolver::{ConfigurationResolver, ProcessEnv, SecretSource},
        repository_factory::{create_registry, storage_backend},
    },
    domain::{
        config::MagentsConfig, events::AgentLifecycleEvent, repository::Registry, runtime::ContainerRuntime,
    },
    infrastructure::{
        event_bus::{EventBus, EventBusError},
        runtime::DockerRuntime,
        session::TmuxSessionController,
    },
    LifecycleOrchestrator,
};

/// Load, override from the environment and validate the configuration.
pub fn load_config(config_path: Option<PathBuf>) -> Result<MagentsConfig> {
    let config = MagentsConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Orchestrator backed by the Docker daemon and the configured registry.
pub async fn build_orchestrator(config: MagentsConfig) -> Result<LifecycleOrchestrator> {
    let docker = DockerRuntime::new(config.spec.runtime.docker_socket_path.clone())
        .context("Failed to initialize Docker runtime")?;
    docker.healthcheck().await.context("Docker daemon is not reachable")?;

    let registry = create_registry(&storage_backend(&config), &config.spec.agents.handle_prefix).await?;
    Ok(assemble(config, registry, Arc::new(docker), Arc::new(ProcessEnv)))
}

/// Wire the orchestrator from already constructed adapters.
pub fn assemble(
    config: MagentsConfig,
    registry: Arc<dyn Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    secrets: Arc<dyn SecretSource>,
) -> LifecycleOrchestrator {
    let sessions = Arc::new(TmuxSessionController::new(runtime.clone()));
    let resolver = ConfigurationResolver::new(Arc::new(config), secrets);
    LifecycleOrchestrator::new(registry, runtime, sessions, resolver, EventBus::with_default_capacity())
}

/// Prints lifecycle events to stderr while an operation runs.
pub struct Progress {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Progress {
    pub fn start(events: &EventBus) -> Self {
        let mut receiver = events.subscribe();
        let stop = CancellationToken::new();
        let token = stop.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = receiver.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(EventBusError::Lagged(_)) => continue,
                        Err(_) => break,
                    },
                    _ = token.cancelled() => {
                        // Flush what was published before the operation returned
                        while let Ok(event) = receiver.try_recv() {
                            print_event(&event);
                        }
                        break;
                    }
                }
            }
        });

        Self { stop, task }
    }

    pub async fn finish(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

fn print_event(event: &AgentLifecycleEvent) {
    if let Some(line) = describe_event(event) {
        eprintln!("{}", line);
    }
}

/// One progress line per event worth showing; state changes are left to the logs.
pub fn describe_event(event: &AgentLifecycleEvent) -> Option<String> {
    let line = match event {
        AgentLifecycleEvent::StateChanged { .. } => return None,
        AgentLifecycleEvent::ProjectCreated { project_id, path, .. } => {
            format!("  {} project {} ({})", "+".green(), project_id.to_string().bold(), path)
        }
        AgentLifecycleEvent::ContainerProvisioned { handle, image, .. } => format!(
            "  {} container {} provisioned ({})",
            "✓".green(),
            handle.bold(),
            image.as_deref().unwrap_or("image unknown")
        ),
        AgentLifecycleEvent::ContainerReady { handle, .. } => {
            format!("  {} container {} ready", "✓".green(), handle.bold())
        }
        AgentLifecycleEvent::SessionBootstrapped { session, created, .. } => {
            if *created {
                format!("  {} tmux session {} created", "✓".green(), session.bold())
            } else {
                format!("  {} tmux session {} already present", "·".dimmed(), session)
            }
        }
        AgentLifecycleEvent::AgentCreated { agent_id, branch, .. } => {
            format!("  {} agent {} registered on {}", "✓".green(), agent_id.to_string().bold(), branch)
        }
        AgentLifecycleEvent::AgentStarted { agent_id, .. } => {
            format!("  {} agent {} started", "✓".green(), agent_id.to_string().bold())
        }
        AgentLifecycleEvent::AgentStopped { agent_id, .. } => {
            format!("  {} agent {} stopped", "✓".green(), agent_id.to_string().bold())
        }
        AgentLifecycleEvent::AgentRemoved { agent_id, .. } => {
            format!("  {} agent {} removed", "✓".green(), agent_id.to_string().bold())
        }
        AgentLifecycleEvent::AgentFailed { agent_id, step, reason, .. } => match step {
            Some(step) => format!("  {} agent {} failed at {}: {}", "✗".red(), agent_id, step, reason),
            None => format!("  {} agent {} failed: {}", "✗".red(), agent_id, reason),
        },
        AgentLifecycleEvent::CreateRolledBack { handle, outcome, .. } => {
            format!("  {} rolled back {}: {}", "↺".yellow(), handle.bold(), outcome)
        }
        AgentLifecycleEvent::OrphanRemoved { handle, .. } => {
            format!("  {} removed orphan container {}", "✓".green(), handle.bold())
        }
    };
    Some(line)
}
