// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle Orchestrator
//!
//! Sequences registry, configuration, provisioning, health gating and
//! session bootstrap into the agent operations exposed by the CLI and the
//! HTTP API.
//!
//! ```text
//! REQUESTED → PROVISIONING → RUNNING ⇄ STOPPED → REMOVED
//!                  │             │
//!                  └──→ ERROR ←──┘
//! ```
//!
//! ## Create
//!
//! 1. validate id, branch and project path; reject known ids and full scopes
//!    (no side effects yet)
//! 2. resolve or auto-create the project, resolve configuration
//! 3. `ensure_running` → `await_ready` → `bootstrap`
//! 4. commit the agent (`RUNNING`), append its id to the project (CAS retry)
//!
//! A failure after step 3 created the container stops and removes it again.
//! If that removal fails the error reports the orphan, which
//! [`reconcile`](LifecycleOrchestrator::reconcile) with `fix` cleans up.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Agent use cases over the domain capabilities

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::config_resolver::{ConfigOverrides, ConfigurationResolver, ResolvedConfiguration};
use crate::application::health::HealthMonitor;
use crate::application::provisioner::{ContainerProvisioner, ProvisionOutcome, ProvisionRequest};
use crate::application::session_bootstrap::{BootstrapOutcome, SessionBootstrapper, SessionPlan};
use crate::domain::agent::{validate_branch, Agent, AgentId, AgentStatus, ContainerHandle, LifecycleState};
use crate::domain::errors::{ItemFailure, LimitScope, OrchestratorError, RollbackOutcome, Step};
use crate::domain::events::AgentLifecycleEvent;
use crate::domain::project::{normalize_path, Project, ProjectId};
use crate::domain::record::AgentRecord;
use crate::domain::repository::{Registry, RepositoryError};
use crate::domain::runtime::{ContainerInfo, ContainerRuntime, RuntimeError};
use crate::domain::session::SessionController;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::project_detector::detect_project_type;

/// Attempts at a compare-and-swap project update before giving up.
const MAX_MEMBERSHIP_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Generated (`agent-<8 hex>`) when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub branch: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub overrides: ConfigOverrides,
}

/// How to reach an agent's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachTarget {
    pub agent_id: AgentId,
    pub handle: ContainerHandle,
    pub session: String,
    /// Host command that opens the session interactively.
    pub command: Vec<String>,
}

impl AttachTarget {
    fn for_agent(agent: &Agent) -> Self {
        let session = agent.handle.session_name();
        Self {
            agent_id: agent.id.clone(),
            handle: agent.handle.clone(),
            command: vec![
                "docker".into(),
                "exec".into(),
                "-it".into(),
                agent.handle.to_string(),
                "tmux".into(),
                "attach-session".into(),
                "-t".into(),
                session.clone(),
            ],
            session,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedAgent {
    pub agent: Agent,
    pub project: Project,
    /// Image of the new container.
    pub image: Option<String>,
    pub attach: AttachTarget,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { agent: Agent },
    Removed { agent_id: AgentId },
}

/// An agent record annotated with what the runtime reports right now.
#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub container: Option<ContainerInfo>,
    /// `running`, `exited`, `missing`, or `unknown` when the runtime could
    /// not be asked.
    pub container_status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub succeeded: Vec<AgentId>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub agent_id: String,
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Managed containers no agent record accounts for.
    pub orphan_containers: Vec<String>,
    /// Agents whose project exists but does not list them.
    pub unlisted_agents: Vec<Membership>,
    pub agents_missing_project: Vec<Membership>,
    /// Ids listed by a project that have no agent record.
    pub dangling_agent_ids: Vec<Membership>,
    pub agents_missing_container: Vec<AgentId>,
    pub fixed: bool,
    pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
    pub fn issue_count(&self) -> usize {
        self.orphan_containers.len()
            + self.unlisted_agents.len()
            + self.agents_missing_project.len()
            + self.dangling_agent_ids.len()
            + self.agents_missing_container.len()
    }

    pub fn is_clean(&self) -> bool {
        self.issue_count() == 0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: Vec<AgentId>,
    /// Ids already present in the registry.
    pub skipped: Vec<AgentId>,
    pub failures: Vec<ItemFailure>,
}

pub struct LifecycleOrchestrator {
    registry: Arc<dyn Registry>,
    runtime: Arc<dyn ContainerRuntime>,
    resolver: ConfigurationResolver,
    provisioner: ContainerProvisioner,
    bootstrapper: SessionBootstrapper,
    events: EventBus,
}

impl LifecycleOrchestrator {
    pub fn new(
        registry: Arc<dyn Registry>,
        runtime: Arc<dyn ContainerRuntime>,
        sessions: Arc<dyn SessionController>,
        resolver: ConfigurationResolver,
        events: EventBus,
    ) -> Self {
        Self {
            provisioner: ContainerProvisioner::new(runtime.clone()),
            bootstrapper: SessionBootstrapper::new(sessions),
            registry,
            runtime,
            resolver,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn resolver(&self) -> &ConfigurationResolver {
        &self.resolver
    }

    pub async fn create(&self, options: CreateOptions) -> Result<CreatedAgent, OrchestratorError> {
        self.create_with_cancel(options, &CancellationToken::new()).await
    }

    /// [`create`](Self::create) whose readiness wait ends early when `cancel`
    /// fires. The container is rolled back like any other late failure.
    pub async fn create_with_cancel(
        &self,
        options: CreateOptions,
        cancel: &CancellationToken,
    ) -> Result<CreatedAgent, OrchestratorError> {
        let agent_id = match options.id.as_deref() {
            Some(raw) => AgentId::parse(raw).map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?,
            None => AgentId::generate(),
        };
        validate_branch(&options.branch).map_err(OrchestratorError::InvalidRequest)?;
        let project_path = resolve_project_dir(&options.project_path)?;

        if self.registry.find_agent(&agent_id).await.map_err(|e| OrchestratorError::store(Step::Validate, e))?.is_some() {
            return Err(OrchestratorError::AlreadyExists(agent_id));
        }

        let existing_project = self
            .registry
            .find_project_by_path(&project_path)
            .await
            .map_err(|e| OrchestratorError::store(Step::ResolveProject, e))?;
        let project = match existing_project {
            Some(project) => project,
            None => self.new_project(project_path.clone()).await,
        };

        let config = self.resolver.resolve(&project, &options.overrides)?;
        self.check_limits(&project.id, &config).await?;

        let project = self.ensure_project(project).await?;
        self.transition(&agent_id, LifecycleState::Requested, LifecycleState::Provisioning);

        let request = ProvisionRequest {
            agent_id: agent_id.clone(),
            branch: options.branch.clone(),
            project_id: project.id.clone(),
            workspace_path: project.path.clone(),
            config,
        };
        let provisioned = match self.provisioner.ensure_running(&request, false).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                self.publish_failure(&agent_id, &e);
                return Err(e);
            }
        };
        self.events.publish(AgentLifecycleEvent::ContainerProvisioned {
            agent_id: agent_id.clone(),
            handle: provisioned.handle.to_string(),
            image: provisioned.image.clone(),
            provisioned_at: Utc::now(),
        });

        let mut agent_written = false;
        let result = self
            .finish_create(&request, &provisioned.handle, &mut agent_written, cancel)
            .await;
        match result {
            Ok(agent) => {
                let refreshed = self.registry.find_project_by_id(&project.id).await.ok().flatten();
                let project = refreshed.unwrap_or(project);
                self.transition(&agent_id, LifecycleState::Provisioning, LifecycleState::Running);
                self.events.publish(AgentLifecycleEvent::AgentCreated {
                    agent_id: agent_id.clone(),
                    project_id: project.id.clone(),
                    branch: agent.branch.clone(),
                    created_at: Utc::now(),
                });
                info!(agent_id = %agent_id, project_id = %project.id, handle = %agent.handle, "Agent created");
                Ok(CreatedAgent { attach: AttachTarget::for_agent(&agent), agent, project, image: provisioned.image })
            }
            Err(e) => Err(self.roll_back_create(&agent_id, &provisioned.handle, agent_written, e).await),
        }
    }

    /// Steps that run once the container exists.
    async fn finish_create(
        &self,
        request: &ProvisionRequest,
        handle: &ContainerHandle,
        agent_written: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<Agent, OrchestratorError> {
        let config = &request.config;
        let monitor = HealthMonitor::with_poll_interval(self.runtime.clone(), config.poll_interval());
        monitor.await_ready_cancellable(handle, config.health_timeout(), cancel).await?;
        self.events.publish(AgentLifecycleEvent::ContainerReady {
            agent_id: request.agent_id.clone(),
            handle: handle.to_string(),
            ready_at: Utc::now(),
        });

        let outcome = self
            .bootstrapper
            .bootstrap(handle, &request.agent_id, &SessionPlan::from_config(config))
            .await
            .map_err(OrchestratorError::Bootstrap)?;
        self.publish_bootstrap(&request.agent_id, handle, outcome);

        let agent = Agent::new(
            request.agent_id.clone(),
            request.branch.clone(),
            request.project_id.clone(),
            request.workspace_path.clone(),
            handle.clone(),
            AgentStatus::Running,
        );
        self.registry.create_agent(&agent).await.map_err(|e| match e {
            RepositoryError::AlreadyExists(_) => OrchestratorError::AlreadyExists(agent.id.clone()),
            other => OrchestratorError::store(Step::RegisterAgent, other),
        })?;
        *agent_written = true;

        match self.update_membership(&request.project_id, &request.agent_id, true, Step::AttachToProject).await? {
            Some(_) => Ok(agent),
            None => Err(OrchestratorError::store(
                Step::AttachToProject,
                RepositoryError::NotFound(format!("project {}", request.project_id)),
            )),
        }
    }

    async fn roll_back_create(
        &self,
        agent_id: &AgentId,
        handle: &ContainerHandle,
        agent_written: bool,
        error: OrchestratorError,
    ) -> OrchestratorError {
        warn!(agent_id = %agent_id, handle = %handle, step = ?error.failed_step(), error = %error, "Create failed, rolling back");
        self.publish_failure(agent_id, &error);

        if agent_written {
            if let Err(e) = self.registry.remove_agent(agent_id).await {
                warn!(agent_id = %agent_id, error = %e, "Failed to remove agent record during rollback");
            }
        }

        let stop_timeout = self.stop_timeout();
        if let Err(e) = self.runtime.stop(handle.as_str(), stop_timeout).await {
            debug!(handle = %handle, error = %e, "Stop during rollback failed");
        }
        let rollback = match self.runtime.remove(handle.as_str()).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => RollbackOutcome::ContainerRemoved,
            Err(e) => {
                warn!(handle = %handle, error = %e, "Container left behind after failed create");
                RollbackOutcome::OrphanLeft { handle: handle.to_string(), reason: e.to_string() }
            }
        };

        self.events.publish(AgentLifecycleEvent::CreateRolledBack {
            agent_id: agent_id.clone(),
            handle: handle.to_string(),
            outcome: rollback.to_string(),
            rolled_back_at: Utc::now(),
        });
        OrchestratorError::CreateFailed { source: Box::new(error), rollback }
    }

    /// Start a tracked agent if needed, gate on readiness and make sure its
    /// session exists.
    pub async fn attach(&self, agent_id: &AgentId) -> Result<AttachTarget, OrchestratorError> {
        let agent = self.require_agent(agent_id).await?;
        let project = self
            .registry
            .find_project_by_id(&agent.project_id)
            .await
            .map_err(|e| OrchestratorError::store(Step::ResolveProject, e))?
            .unwrap_or_else(|| self.detached_project(&agent));
        let config = self.resolver.resolve(&project, &ConfigOverrides::default())?;

        let request = ProvisionRequest {
            agent_id: agent.id.clone(),
            branch: agent.branch.clone(),
            project_id: agent.project_id.clone(),
            workspace_path: agent.workspace_path.clone(),
            config,
        };
        let provisioned = match self.start_and_gate(&request, &agent.handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.mark(&agent, AgentStatus::Error).await;
                self.publish_failure(&agent.id, &e);
                return Err(e);
            }
        };

        let outcome = self
            .bootstrapper
            .bootstrap(&agent.handle, &agent.id, &SessionPlan::from_config(&request.config))
            .await
            .map_err(OrchestratorError::Bootstrap)?;
        self.publish_bootstrap(&agent.id, &agent.handle, outcome);

        if agent.status != AgentStatus::Running {
            self.registry
                .update_agent_status(&agent.id, agent.status, AgentStatus::Running)
                .await
                .map_err(|e| OrchestratorError::store(Step::UpdateStatus, e))?;
            self.transition(&agent.id, agent.status.into(), LifecycleState::Running);
            self.events.publish(AgentLifecycleEvent::AgentStarted { agent_id: agent.id.clone(), started_at: Utc::now() });
            info!(agent_id = %agent.id, "Agent started");
        } else if provisioned == ProvisionOutcome::Started {
            // Recorded as running but the container had stopped underneath
            self.events.publish(AgentLifecycleEvent::AgentStarted { agent_id: agent.id.clone(), started_at: Utc::now() });
            info!(agent_id = %agent.id, "Restarted container of running agent");
        }
        Ok(AttachTarget::for_agent(&agent))
    }

    async fn start_and_gate(
        &self,
        request: &ProvisionRequest,
        handle: &ContainerHandle,
    ) -> Result<ProvisionOutcome, OrchestratorError> {
        let provisioned = self.provisioner.ensure_running(request, true).await?;
        let config = &request.config;
        HealthMonitor::with_poll_interval(self.runtime.clone(), config.poll_interval())
            .await_ready(handle, config.health_timeout())
            .await?;
        self.events.publish(AgentLifecycleEvent::ContainerReady {
            agent_id: request.agent_id.clone(),
            handle: handle.to_string(),
            ready_at: Utc::now(),
        });
        Ok(provisioned.outcome)
    }

    /// Stop an agent's container; with `remove`, also delete the container
    /// and the record and detach the id from its project.
    ///
    /// The registry changes only after the runtime call succeeded. With
    /// `remove`, a container that no longer exists counts as success so the
    /// record can still be deleted.
    pub async fn stop(&self, agent_id: &AgentId, remove: bool) -> Result<StopOutcome, OrchestratorError> {
        let agent = self.require_agent(agent_id).await?;

        match self.runtime.stop(agent.handle.as_str(), self.stop_timeout()).await {
            Ok(()) => {}
            // A vanished container is already as removed as it will get
            Err(RuntimeError::NotFound(_)) if remove => {
                warn!(agent_id = %agent.id, handle = %agent.handle, "Container already gone, removing record");
            }
            Err(RuntimeError::NotFound(_)) => {
                return Err(OrchestratorError::NotFound { kind: "container", id: agent.handle.to_string() });
            }
            Err(e) => return Err(OrchestratorError::provisioning(Step::Stop, e)),
        }

        if !remove {
            let updated = if agent.status == AgentStatus::Stopped {
                agent
            } else {
                let updated = self
                    .registry
                    .update_agent_status(&agent.id, agent.status, AgentStatus::Stopped)
                    .await
                    .map_err(|e| OrchestratorError::store(Step::UpdateStatus, e))?;
                self.transition(&agent.id, agent.status.into(), LifecycleState::Stopped);
                updated
            };
            self.events.publish(AgentLifecycleEvent::AgentStopped { agent_id: updated.id.clone(), stopped_at: Utc::now() });
            info!(agent_id = %updated.id, "Agent stopped");
            return Ok(StopOutcome::Stopped { agent: updated });
        }

        match self.runtime.remove(agent.handle.as_str()).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => return Err(OrchestratorError::provisioning(Step::Remove, e)),
        }
        match self.registry.remove_agent(&agent.id).await {
            Ok(()) | Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(OrchestratorError::store(Step::Remove, e)),
        }
        if self.update_membership(&agent.project_id, &agent.id, false, Step::Remove).await?.is_none() {
            warn!(agent_id = %agent.id, project_id = %agent.project_id, "Removed agent referenced a missing project");
        }

        self.transition(&agent.id, agent.status.into(), LifecycleState::Removed);
        self.events.publish(AgentLifecycleEvent::AgentRemoved { agent_id: agent.id.clone(), removed_at: Utc::now() });
        info!(agent_id = %agent.id, "Agent removed");
        Ok(StopOutcome::Removed { agent_id: agent.id })
    }

    /// Stop every registered agent; any failure turns the report into a
    /// `PartialFailure`.
    pub async fn cleanup_all(&self, remove: bool) -> Result<CleanupReport, OrchestratorError> {
        let agents = self.registry.list_agents().await.map_err(|e| OrchestratorError::store(Step::Stop, e))?;
        let mut report = CleanupReport::default();

        for agent in agents {
            match self.stop(&agent.id, remove).await {
                Ok(_) => report.succeeded.push(agent.id),
                Err(e) => {
                    warn!(agent_id = %agent.id, error = %e, "Cleanup failed for agent");
                    report.failures.push(ItemFailure::from_error(agent.id.as_str(), &e));
                }
            }
        }

        info!(succeeded = report.succeeded.len(), failed = report.failures.len(), "Cleanup finished");
        if report.failures.is_empty() {
            Ok(report)
        } else {
            Err(OrchestratorError::PartialFailure { succeeded: report.succeeded.len(), failures: report.failures })
        }
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<AgentView>, OrchestratorError> {
        let project_id = match &filter.project_path {
            Some(path) => match self.find_project(path).await? {
                Some(project) => Some(project.id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let agents = self.registry.list_agents().await.map_err(|e| OrchestratorError::store(Step::Validate, e))?;
        let mut views = Vec::new();
        for agent in agents {
            if project_id.as_ref().is_some_and(|id| *id != agent.project_id) {
                continue;
            }
            if filter.status.is_some_and(|status| status != agent.status) {
                continue;
            }
            views.push(self.view(agent).await);
        }
        Ok(views)
    }

    pub async fn show(&self, agent_id: &AgentId) -> Result<AgentView, OrchestratorError> {
        let agent = self.require_agent(agent_id).await?;
        Ok(self.view(agent).await)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, OrchestratorError> {
        self.registry.list_projects().await.map_err(|e| OrchestratorError::store(Step::ResolveProject, e))
    }

    pub async fn find_project(&self, path: &Path) -> Result<Option<Project>, OrchestratorError> {
        let normalized = normalize_path(path)
            .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid project path {}: {}", path.display(), e)))?;
        self.registry
            .find_project_by_path(&normalized)
            .await
            .map_err(|e| OrchestratorError::store(Step::ResolveProject, e))
    }

    /// Compare registry and runtime and, with `fix`, repair what can be
    /// repaired. Per-item repair failures are reported, not raised.
    pub async fn reconcile(&self, fix: bool) -> Result<ReconcileReport, OrchestratorError> {
        let store = |e| OrchestratorError::store(Step::Reconcile, e);
        let agents = self.registry.list_agents().await.map_err(store)?;
        let projects = self.registry.list_projects().await.map_err(store)?;
        let containers = self
            .runtime
            .list_managed()
            .await
            .map_err(|e| OrchestratorError::provisioning(Step::Reconcile, e))?;

        let agent_ids: BTreeSet<&str> = agents.iter().map(|a| a.id.as_str()).collect();
        let handles: BTreeSet<&str> = agents.iter().map(|a| a.handle.as_str()).collect();
        let projects_by_id: BTreeMap<&ProjectId, &Project> = projects.iter().map(|p| (&p.id, p)).collect();

        let mut report = ReconcileReport { fixed: fix, ..Default::default() };

        for container in &containers {
            let claimed = handles.contains(container.name.as_str())
                || container.agent_label().is_some_and(|id| agent_ids.contains(id));
            if !claimed {
                report.orphan_containers.push(container.name.clone());
            }
        }

        for agent in &agents {
            let membership = Membership { agent_id: agent.id.to_string(), project_id: agent.project_id.clone() };
            match projects_by_id.get(&agent.project_id) {
                Some(project) if !project.owns(&agent.id) => report.unlisted_agents.push(membership),
                Some(_) => {}
                None => report.agents_missing_project.push(membership),
            }

            if matches!(agent.status, AgentStatus::Running | AgentStatus::Stopped) {
                match self.runtime.inspect(agent.handle.as_str()).await {
                    Ok(Some(_)) => {}
                    Ok(None) => report.agents_missing_container.push(agent.id.clone()),
                    Err(e) => report.failures.push(ItemFailure::from_error(
                        agent.id.as_str(),
                        &OrchestratorError::provisioning(Step::Reconcile, e),
                    )),
                }
            }
        }

        for project in &projects {
            for id in &project.agent_ids {
                if !agent_ids.contains(id.as_str()) {
                    report
                        .dangling_agent_ids
                        .push(Membership { agent_id: id.to_string(), project_id: project.id.clone() });
                }
            }
        }

        if fix {
            self.repair(&agents, &mut report).await;
        }

        info!(issues = report.issue_count(), fixed = fix, failures = report.failures.len(), "Reconcile finished");
        Ok(report)
    }

    async fn repair(&self, agents: &[Agent], report: &mut ReconcileReport) {
        let mut failures = Vec::new();

        for name in &report.orphan_containers {
            match self.runtime.remove(name).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {
                    info!(handle = %name, "Removed orphan container");
                    self.events.publish(AgentLifecycleEvent::OrphanRemoved { handle: name.clone(), removed_at: Utc::now() });
                }
                Err(e) => failures.push(ItemFailure::from_error(
                    name.as_str(),
                    &OrchestratorError::provisioning(Step::Remove, e),
                )),
            }
        }

        let memberships = report
            .unlisted_agents
            .iter()
            .map(|m| (m, true))
            .chain(report.dangling_agent_ids.iter().map(|m| (m, false)));
        for (membership, attach) in memberships {
            let result = match AgentId::parse(&membership.agent_id) {
                Ok(id) => self.update_membership(&membership.project_id, &id, attach, Step::Reconcile).await.map(|_| ()),
                // Ids the registry could not parse can only be pruned by hand
                Err(e) => Err(OrchestratorError::InvalidRequest(e.to_string())),
            };
            if let Err(e) = result {
                failures.push(ItemFailure::from_error(membership.agent_id.as_str(), &e));
            }
        }

        for id in &report.agents_missing_container {
            let Some(agent) = agents.iter().find(|a| &a.id == id) else {
                continue;
            };
            match self.registry.update_agent_status(&agent.id, agent.status, AgentStatus::Error).await {
                Ok(_) => self.transition(&agent.id, agent.status.into(), LifecycleState::Error),
                Err(e) => failures.push(ItemFailure::from_error(
                    agent.id.as_str(),
                    &OrchestratorError::store(Step::Reconcile, e),
                )),
            }
        }

        report.failures.extend(failures);
    }

    /// Commit records read from an older registry. Ids already present are
    /// skipped; projects are created from each record's workspace path.
    pub async fn import_legacy(&self, records: Vec<AgentRecord>) -> Result<ImportReport, OrchestratorError> {
        let prefix = self.resolver.global().spec.agents.handle_prefix.clone();
        let mut report = ImportReport::default();

        for record in records {
            let record_id = record_id(&record).to_string();
            let agent = match record.migrate(&prefix) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(record = %record_id, error = %e, "Skipping unmigratable legacy record");
                    report.failures.push(ItemFailure {
                        id: record_id,
                        step: Some(Step::Import),
                        message: e.to_string(),
                        retryable: false,
                    });
                    continue;
                }
            };

            match self.import_one(&agent).await {
                Ok(true) => report.imported.push(agent.id),
                Ok(false) => report.skipped.push(agent.id),
                Err(e) => report.failures.push(ItemFailure::from_error(agent.id.as_str(), &e)),
            }
        }

        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "Legacy import finished"
        );
        Ok(report)
    }

    async fn import_one(&self, agent: &Agent) -> Result<bool, OrchestratorError> {
        let store = |e| OrchestratorError::store(Step::Import, e);
        if self.registry.find_agent(&agent.id).await.map_err(store)?.is_some() {
            return Ok(false);
        }

        let project = match self.registry.find_project_by_path(&agent.workspace_path).await.map_err(store)? {
            Some(project) => project,
            None => {
                let project = self.new_project(agent.workspace_path.clone()).await;
                self.ensure_project(project).await?
            }
        };

        let mut agent = agent.clone();
        agent.project_id = project.id.clone();
        match self.registry.create_agent(&agent).await {
            Ok(()) => {}
            Err(RepositoryError::AlreadyExists(_)) => return Ok(false),
            Err(e) => return Err(store(e)),
        }
        self.update_membership(&project.id, &agent.id, true, Step::Import).await?;
        info!(agent_id = %agent.id, project_id = %project.id, "Imported legacy agent");
        Ok(true)
    }

    async fn require_agent(&self, agent_id: &AgentId) -> Result<Agent, OrchestratorError> {
        self.registry
            .find_agent(agent_id)
            .await
            .map_err(|e| OrchestratorError::store(Step::Validate, e))?
            .ok_or_else(|| OrchestratorError::agent_not_found(agent_id))
    }

    async fn view(&self, agent: Agent) -> AgentView {
        match self.runtime.inspect(agent.handle.as_str()).await {
            Ok(Some(info)) => AgentView { container_status: info.status_summary(), container: Some(info), agent },
            Ok(None) => AgentView { container: None, container_status: "missing".to_string(), agent },
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "Could not inspect container");
                AgentView { container: None, container_status: "unknown".to_string(), agent }
            }
        }
    }

    async fn new_project(&self, path: PathBuf) -> Project {
        let max_agents = self.resolver.global().spec.agents.project_max_agents;
        let detect_root = path.clone();
        let project_type = tokio::task::spawn_blocking(move || detect_project_type(&detect_root))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Project type detection did not complete");
                None
            });
        let mut project = Project::new(path, max_agents);
        project.project_type = project_type;
        project
    }

    /// Persist a project built by [`new_project`](Self::new_project), or
    /// return the stored one when it is already registered.
    async fn ensure_project(&self, project: Project) -> Result<Project, OrchestratorError> {
        let store = |e| OrchestratorError::store(Step::ResolveProject, e);
        if let Some(stored) = self.registry.find_project_by_id(&project.id).await.map_err(store)? {
            return Ok(stored);
        }
        match self.registry.create_project(&project).await {
            Ok(()) => {
                info!(project_id = %project.id, path = %project.path.display(), "Registered project");
                self.events.publish(AgentLifecycleEvent::ProjectCreated {
                    project_id: project.id.clone(),
                    path: project.path.display().to_string(),
                    created_at: Utc::now(),
                });
                Ok(project)
            }
            // Another process registered the same path in between
            Err(RepositoryError::AlreadyExists(_)) => self
                .registry
                .find_project_by_path(&project.path)
                .await
                .map_err(store)?
                .ok_or_else(|| store(RepositoryError::NotFound(format!("project {}", project.id)))),
            Err(e) => Err(store(e)),
        }
    }

    /// Stand-in project for resolving an agent whose project record is gone.
    fn detached_project(&self, agent: &Agent) -> Project {
        let mut project = Project::new(agent.workspace_path.clone(), self.resolver.global().spec.agents.project_max_agents);
        project.id = agent.project_id.clone();
        project
    }

    async fn check_limits(&self, project_id: &ProjectId, config: &ResolvedConfiguration) -> Result<(), OrchestratorError> {
        let agents = self.registry.list_agents().await.map_err(|e| OrchestratorError::store(Step::Validate, e))?;
        let live: Vec<&Agent> = agents.iter().filter(|a| a.status.is_live()).collect();

        if live.len() >= config.max_agents_global as usize {
            return Err(OrchestratorError::LimitExceeded {
                scope: LimitScope::Global,
                live: live.len(),
                max: config.max_agents_global,
            });
        }
        let in_project = live.iter().filter(|a| a.project_id == *project_id).count();
        if in_project >= config.max_agents_project as usize {
            return Err(OrchestratorError::LimitExceeded {
                scope: LimitScope::Project(project_id.clone()),
                live: in_project,
                max: config.max_agents_project,
            });
        }
        Ok(())
    }

    /// Add or drop `agent_id` in the project's membership list, retrying on
    /// version conflicts. `Ok(None)` when the project does not exist.
    async fn update_membership(
        &self,
        project_id: &ProjectId,
        agent_id: &AgentId,
        attach: bool,
        step: Step,
    ) -> Result<Option<Project>, OrchestratorError> {
        for attempt in 1..=MAX_MEMBERSHIP_ATTEMPTS {
            let Some(mut project) = self
                .registry
                .find_project_by_id(project_id)
                .await
                .map_err(|e| OrchestratorError::store(step, e))?
            else {
                return Ok(None);
            };

            let changed = if attach { project.attach_agent(agent_id.clone()) } else { project.detach_agent(agent_id) };
            if !changed {
                return Ok(Some(project));
            }

            match self.registry.update_project(&project).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(RepositoryError::Conflict(_)) => {
                    debug!(project_id = %project_id, attempt, "Project version conflict, retrying");
                }
                Err(e) => return Err(OrchestratorError::store(step, e)),
            }
        }
        Err(OrchestratorError::store(
            step,
            RepositoryError::Conflict(format!("project {} after {} attempts", project_id, MAX_MEMBERSHIP_ATTEMPTS)),
        ))
    }

    /// Best-effort status change used on failure paths.
    async fn mark(&self, agent: &Agent, status: AgentStatus) {
        if agent.status == status {
            return;
        }
        match self.registry.update_agent_status(&agent.id, agent.status, status).await {
            Ok(_) => self.transition(&agent.id, agent.status.into(), status.into()),
            Err(e) => warn!(agent_id = %agent.id, error = %e, "Failed to record agent status {}", status),
        }
    }

    fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.resolver.global().spec.runtime.stop_timeout_secs)
    }

    fn transition(&self, agent_id: &AgentId, from: LifecycleState, to: LifecycleState) {
        if !from.can_transition_to(to) {
            warn!(agent_id = %agent_id, %from, %to, "Unexpected lifecycle transition");
        }
        self.events.publish(AgentLifecycleEvent::StateChanged {
            agent_id: agent_id.clone(),
            from,
            to,
            changed_at: Utc::now(),
        });
    }

    fn publish_bootstrap(&self, agent_id: &AgentId, handle: &ContainerHandle, outcome: BootstrapOutcome) {
        self.events.publish(AgentLifecycleEvent::SessionBootstrapped {
            agent_id: agent_id.clone(),
            session: handle.session_name(),
            created: outcome != BootstrapOutcome::AlreadyPresent,
            bootstrapped_at: Utc::now(),
        });
    }

    fn publish_failure(&self, agent_id: &AgentId, error: &OrchestratorError) {
        self.events.publish(AgentLifecycleEvent::AgentFailed {
            agent_id: agent_id.clone(),
            step: error.failed_step(),
            reason: error.to_string(),
            failed_at: Utc::now(),
        });
    }
}

/// Normalize a caller-supplied project path; it must name a directory.
fn resolve_project_dir(path: &Path) -> Result<PathBuf, OrchestratorError> {
    if path.as_os_str().is_empty() {
        return Err(OrchestratorError::InvalidRequest("project path cannot be empty".into()));
    }
    let normalized = normalize_path(path)
        .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid project path {}: {}", path.display(), e)))?;
    if !normalized.is_dir() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "project path {} is not a directory",
            normalized.display()
        )));
    }
    Ok(normalized)
}

fn record_id(record: &AgentRecord) -> &str {
    match record {
        AgentRecord::V1 { id, .. } | AgentRecord::V2 { id, .. } => id,
    }
}
