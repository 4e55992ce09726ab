// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Provisioner
//!
//! Brings the container of one agent to the running state without ever
//! recreating an existing one.
//!
//! | Container | Tracked by registry | Result |
//! |-----------|--------------------|--------|
//! | absent | no | stage host dirs, create, start |
//! | absent | yes | `NotFound` (use reconcile) |
//! | present | no | `Conflict` |
//! | present, labelled for another agent | any | `Conflict` |
//! | present, running | yes | unchanged |
//! | present, stopped | yes | start |
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Container spec construction and create/start sequencing

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::application::config_resolver::ResolvedConfiguration;
use crate::domain::agent::{AgentId, ContainerHandle};
use crate::domain::errors::{OrchestratorError, Step};
use crate::domain::project::ProjectId;
use crate::domain::runtime::{labels, ContainerRuntime, ContainerSpec, Mount};

pub const AGENT_STATE_MOUNT: &str = "/agent";
pub const SHARED_CONFIG_MOUNT: &str = "/shared";

/// Copied from the workspace root into the shared config dir before create.
pub const SHARED_CONFIG_ENTRIES: &[&str] = &[".taskmaster", "CLAUDE.md", ".mcp.json"];

/// Where the host bridge socket appears inside the container.
pub const BRIDGE_SOCKET_MOUNT: &str = "/host/claude-bridge.sock";

const KEEP_ALIVE_CMD: &[&str] = &["tail", "-f", "/dev/null"];
const AUTH_ENTRYPOINT: &[&str] = &["/bin/bash", "-c", "while true; do sleep 3600; done"];

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub agent_id: AgentId,
    pub branch: String,
    pub project_id: ProjectId,
    pub workspace_path: PathBuf,
    pub config: ResolvedConfiguration,
}

impl ProvisionRequest {
    pub fn handle(&self) -> ContainerHandle {
        ContainerHandle::for_agent(&self.config.handle_prefix, &self.agent_id)
    }
}

/// Results of the host capability lookups made before a create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    /// The auth volume exists (never set when an image override is given).
    pub auth_volume: bool,
    /// The configured bridge socket exists on the host.
    pub bridge_socket: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct ProvisionedContainer {
    pub handle: ContainerHandle,
    pub outcome: ProvisionOutcome,
    /// Image of a newly created container.
    pub image: Option<String>,
}

pub struct ContainerProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// `tracked` says whether the registry already holds this agent.
    pub async fn ensure_running(
        &self,
        request: &ProvisionRequest,
        tracked: bool,
    ) -> Result<ProvisionedContainer, OrchestratorError> {
        let handle = request.handle();
        let existing = self
            .runtime
            .inspect(handle.as_str())
            .await
            .map_err(|e| OrchestratorError::provisioning(Step::Provision, e))?;

        if let Some(info) = existing {
            if let Some(owner) = info.agent_label().filter(|owner| *owner != request.agent_id.as_str()) {
                return Err(OrchestratorError::Conflict {
                    handle,
                    detail: format!("labelled for agent '{}'", owner),
                });
            }
            if !tracked {
                return Err(OrchestratorError::Conflict {
                    handle,
                    detail: format!("container is {}", info.status_summary()),
                });
            }
            if info.state.is_running() {
                return Ok(ProvisionedContainer { handle, outcome: ProvisionOutcome::AlreadyRunning, image: None });
            }
            self.runtime
                .start(handle.as_str())
                .await
                .map_err(|e| OrchestratorError::provisioning(Step::Provision, e))?;
            info!(agent_id = %request.agent_id, handle = %handle, "Started existing container");
            return Ok(ProvisionedContainer { handle, outcome: ProvisionOutcome::Started, image: None });
        }

        if tracked {
            return Err(OrchestratorError::NotFound { kind: "container", id: handle.to_string() });
        }

        stage_host_dirs(request).await?;

        let capabilities = self.detect_capabilities(&request.config).await?;
        let spec = build_spec(request, capabilities);
        self.runtime
            .create(&spec)
            .await
            .map_err(|e| OrchestratorError::provisioning(Step::Provision, e))?;

        if let Err(e) = self.runtime.start(handle.as_str()).await {
            // Never leave a created-but-unstarted container behind
            if let Err(remove_err) = self.runtime.remove(handle.as_str()).await {
                warn!(handle = %handle, error = %remove_err, "Failed to remove container after start failure");
            }
            return Err(OrchestratorError::provisioning(Step::Provision, e));
        }

        info!(agent_id = %request.agent_id, handle = %handle, image = %spec.image, "Provisioned container");
        Ok(ProvisionedContainer { handle, outcome: ProvisionOutcome::Created, image: Some(spec.image) })
    }

    async fn detect_capabilities(&self, config: &ResolvedConfiguration) -> Result<HostCapabilities, OrchestratorError> {
        let auth_volume = match config.image_override {
            Some(_) => false,
            None => self
                .runtime
                .volume_exists(&config.auth_volume)
                .await
                .map_err(|e| OrchestratorError::provisioning(Step::Provision, e))?,
        };
        let bridge_socket = match &config.bridge_socket {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Could not check bridge socket");
                false
            }),
            None => false,
        };
        Ok(HostCapabilities { auth_volume, bridge_socket })
    }
}

/// Container spec for a new agent given what the host offers.
pub fn build_spec(request: &ProvisionRequest, capabilities: HostCapabilities) -> ContainerSpec {
    let config = &request.config;
    let auth_available = capabilities.auth_volume;
    let bridge = config.bridge_socket.as_ref().filter(|_| capabilities.bridge_socket);

    let image = match (&config.image_override, auth_available) {
        (Some(image), _) => image.clone(),
        (None, true) => config.auth_image.clone(),
        (None, false) => config.default_image.clone(),
    };

    let mut mounts = vec![
        Mount::bind(request.workspace_path.to_string_lossy(), config.workspace_dir.clone()),
        Mount::bind(
            config.agent_state_dir(request.agent_id.as_str()).to_string_lossy(),
            AGENT_STATE_MOUNT,
        ),
        Mount::bind(config.shared_config_dir().to_string_lossy(), SHARED_CONFIG_MOUNT),
    ];
    if auth_available {
        mounts.push(Mount::volume(config.auth_volume.clone(), config.auth_home.clone()));
    }
    if let Some(socket) = bridge {
        mounts.push(Mount::bind(socket.to_string_lossy(), BRIDGE_SOCKET_MOUNT));
    }

    let labels = BTreeMap::from([
        (labels::MANAGED.to_string(), "true".to_string()),
        (labels::AGENT_ID.to_string(), request.agent_id.to_string()),
        (labels::BRANCH.to_string(), request.branch.clone()),
        (labels::PROJECT_ID.to_string(), request.project_id.to_string()),
    ]);

    let mut env = config.env.clone();
    env.insert("AGENT_ID".to_string(), request.agent_id.to_string());
    env.insert("AGENT_BRANCH".to_string(), request.branch.clone());
    for (key, value) in config.secrets.iter() {
        env.insert(key.clone(), value.clone());
    }
    // Authenticated containers talk to Claude directly
    if bridge.is_some() && !auth_available {
        env.insert("CLAUDE_BRIDGE_SOCKET".to_string(), BRIDGE_SOCKET_MOUNT.to_string());
    }

    let (entrypoint, cmd) = if auth_available {
        (Some(AUTH_ENTRYPOINT.iter().map(|s| s.to_string()).collect()), Vec::new())
    } else {
        (None, KEEP_ALIVE_CMD.iter().map(|s| s.to_string()).collect())
    };

    ContainerSpec {
        name: request.handle().to_string(),
        image,
        mounts,
        env,
        labels,
        limits: config.limits.clone(),
        entrypoint,
        cmd,
        working_dir: Some(config.workspace_dir.clone()),
    }
}

/// Create the per-agent state dir and refresh the shared config dir.
async fn stage_host_dirs(request: &ProvisionRequest) -> Result<(), OrchestratorError> {
    let workspace = request.workspace_path.clone();
    let agent_dir = request.config.agent_state_dir(request.agent_id.as_str());
    let shared_dir = request.config.shared_config_dir();

    tokio::task::spawn_blocking(move || {
        create_dir(&agent_dir)?;
        create_dir(&shared_dir)?;
        for entry in SHARED_CONFIG_ENTRIES {
            let source = workspace.join(entry);
            if source.exists() {
                copy_recursive(&source, &shared_dir.join(entry))?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| OrchestratorError::Staging {
        path: request.workspace_path.clone(),
        source: std::io::Error::other(e.to_string()),
    })?
}

fn create_dir(path: &Path) -> Result<(), OrchestratorError> {
    std::fs::create_dir_all(path).map_err(|source| OrchestratorError::Staging { path: path.to_path_buf(), source })
}

fn copy_recursive(source: &Path, target: &Path) -> Result<(), OrchestratorError> {
    if source.is_file() {
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        std::fs::copy(source, target)
            .map_err(|e| OrchestratorError::Staging { path: source.to_path_buf(), source: e })?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| OrchestratorError::Staging {
            path: source.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            create_dir(&destination)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &destination)
                .map_err(|e| OrchestratorError::Staging { path: entry.path().to_path_buf(), source: e })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config_resolver::{ConfigOverrides, ConfigurationResolver, ProjectSettings};
    use crate::domain::config::MagentsConfig;
    use crate::domain::project::Project;
    use crate::domain::runtime::{ContainerState, MountKind};
    use crate::infrastructure::in_memory_runtime::{FailOn, InMemoryContainerRuntime};

    fn request(workspace: &Path, state_dir: &Path, overrides: ConfigOverrides) -> ProvisionRequest {
        let mut config = MagentsConfig::default();
        config.spec.agents.state_dir = Some(state_dir.to_path_buf());
        let secrets: BTreeMap<String, String> =
            BTreeMap::from([("ANTHROPIC_API_KEY".to_string(), "sk-test".to_string())]);
        let resolver = ConfigurationResolver::new(Arc::new(config), Arc::new(secrets));
        let project = Project::new(workspace.to_path_buf(), 5);
        let resolved = resolver.merge(&project, &ProjectSettings::default(), &overrides).unwrap();
        ProvisionRequest {
            agent_id: AgentId::parse("demo-1").unwrap(),
            branch: "feature/x".into(),
            project_id: project.id,
            workspace_path: workspace.to_path_buf(),
            config: resolved,
        }
    }

    #[test]
    fn test_spec_without_auth_volume() {
        let req = request(Path::new("/repos/shop"), Path::new("/state"), ConfigOverrides::default());
        let spec = build_spec(&req, HostCapabilities::default());

        assert_eq!(spec.name, "magents-demo-1");
        assert_eq!(spec.image, "magents/agent:latest");
        assert_eq!(spec.cmd, vec!["tail", "-f", "/dev/null"]);
        assert!(spec.entrypoint.is_none());
        assert_eq!(spec.env.get("AGENT_ID").map(String::as_str), Some("demo-1"));
        assert_eq!(spec.env.get("AGENT_BRANCH").map(String::as_str), Some("feature/x"));
        assert_eq!(spec.env.get("ANTHROPIC_API_KEY").map(String::as_str), Some("sk-test"));
        assert_eq!(spec.labels.get(labels::MANAGED).map(String::as_str), Some("true"));

        let targets: Vec<&str> = spec.mounts.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, vec!["/workspace", "/agent", "/shared"]);
        assert_eq!(spec.mounts[1].source, "/state/agents/demo-1");
        assert!(!spec.env.contains_key("CLAUDE_BRIDGE_SOCKET"));

        let bridged = build_spec(&req, HostCapabilities { auth_volume: false, bridge_socket: true });
        let bridge = bridged.mounts.last().unwrap();
        assert_eq!(bridge.kind, MountKind::Bind);
        assert_eq!(bridge.source, "/tmp/claude-bridge-persistent/claude-bridge.sock");
        assert_eq!(bridge.target, "/host/claude-bridge.sock");
        assert_eq!(bridged.env.get("CLAUDE_BRIDGE_SOCKET").map(String::as_str), Some("/host/claude-bridge.sock"));
        assert_eq!(bridged.image, "magents/agent:latest");
    }

    #[test]
    fn test_spec_with_auth_volume() {
        let req = request(Path::new("/repos/shop"), Path::new("/state"), ConfigOverrides::default());
        let spec = build_spec(&req, HostCapabilities { auth_volume: true, bridge_socket: true });

        assert_eq!(spec.image, "magents/claude:dev");
        assert!(spec.cmd.is_empty());
        assert_eq!(spec.entrypoint.as_ref().map(|e| e[0].as_str()), Some("/bin/bash"));
        let auth = spec.mounts.iter().find(|m| m.kind == MountKind::Volume).unwrap();
        assert_eq!(auth.source, "claude-container-auth");
        assert_eq!(auth.target, "/home/magents");
        // The socket is still mounted but the agent authenticates on its own
        assert!(spec.mounts.iter().any(|m| m.target == "/host/claude-bridge.sock"));
        assert!(!spec.env.contains_key("CLAUDE_BRIDGE_SOCKET"));
    }

    #[tokio::test]
    async fn test_bridge_socket_detected_on_host() {
        let workspace = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let socket = state.path().join("bridge.sock");
        std::fs::write(&socket, "").unwrap();

        let runtime = InMemoryContainerRuntime::new();
        let provisioner = ContainerProvisioner::new(Arc::new(runtime.clone()));
        let mut req = request(workspace.path(), state.path(), ConfigOverrides::default());
        req.config.bridge_socket = Some(socket.clone());

        let capabilities = provisioner.detect_capabilities(&req.config).await.unwrap();
        assert_eq!(capabilities, HostCapabilities { auth_volume: false, bridge_socket: true });

        provisioner.ensure_running(&req, false).await.unwrap();
        let spec = runtime.spec_of("magents-demo-1").unwrap();
        assert!(spec.mounts.iter().any(|m| m.source == socket.to_string_lossy() && m.target == BRIDGE_SOCKET_MOUNT));
        assert_eq!(spec.env.get("CLAUDE_BRIDGE_SOCKET").map(String::as_str), Some(BRIDGE_SOCKET_MOUNT));

        req.config.bridge_socket = Some(state.path().join("missing.sock"));
        assert!(!provisioner.detect_capabilities(&req.config).await.unwrap().bridge_socket);
        req.config.bridge_socket = None;
        assert!(!provisioner.detect_capabilities(&req.config).await.unwrap().bridge_socket);
    }

    #[tokio::test]
    async fn test_override_skips_probe_and_stages_shared_config() {
        let workspace = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("CLAUDE.md"), "# notes").unwrap();
        std::fs::create_dir_all(workspace.path().join(".taskmaster/tasks")).unwrap();
        std::fs::write(workspace.path().join(".taskmaster/tasks/tasks.json"), "[]").unwrap();

        let runtime = InMemoryContainerRuntime::new();
        runtime.add_volume("claude-container-auth");
        let provisioner = ContainerProvisioner::new(Arc::new(runtime.clone()));
        let overrides = ConfigOverrides { image: Some("custom:1".into()), ..Default::default() };
        let req = request(workspace.path(), state.path(), overrides);

        let provisioned = provisioner.ensure_running(&req, false).await.unwrap();
        assert_eq!(provisioned.outcome, ProvisionOutcome::Created);
        assert_eq!(provisioned.image.as_deref(), Some("custom:1"));
        assert_eq!(runtime.state_of("magents-demo-1"), Some(ContainerState::Running));

        let shared = state.path().join("shared-config");
        assert!(shared.join("CLAUDE.md").is_file());
        assert!(shared.join(".taskmaster/tasks/tasks.json").is_file());
        assert!(state.path().join("agents/demo-1").is_dir());
    }

    #[tokio::test]
    async fn test_existing_container_paths() {
        let workspace = tempfile::tempdir().unwrap();
        let runtime = InMemoryContainerRuntime::new();
        let provisioner = ContainerProvisioner::new(Arc::new(runtime.clone()));
        let req = request(workspace.path(), workspace.path(), ConfigOverrides::default());

        // Untracked container with our name
        runtime.insert_container("magents-demo-1", ContainerState::Exited, BTreeMap::new());
        assert!(matches!(provisioner.ensure_running(&req, false).await, Err(OrchestratorError::Conflict { .. })));

        // Tracked and stopped: started, never recreated
        let started = provisioner.ensure_running(&req, true).await.unwrap();
        assert_eq!(started.outcome, ProvisionOutcome::Started);
        let again = provisioner.ensure_running(&req, true).await.unwrap();
        assert_eq!(again.outcome, ProvisionOutcome::AlreadyRunning);

        // Labelled for someone else
        runtime.insert_container(
            "magents-demo-1",
            ContainerState::Running,
            BTreeMap::from([(labels::AGENT_ID.to_string(), "other".to_string())]),
        );
        assert!(matches!(provisioner.ensure_running(&req, true).await, Err(OrchestratorError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_tracked_but_missing_container() {
        let workspace = tempfile::tempdir().unwrap();
        let provisioner = ContainerProvisioner::new(Arc::new(InMemoryContainerRuntime::new()));
        let req = request(workspace.path(), workspace.path(), ConfigOverrides::default());
        assert!(matches!(
            provisioner.ensure_running(&req, true).await,
            Err(OrchestratorError::NotFound { kind: "container", .. })
        ));
    }

    #[tokio::test]
    async fn test_start_failure_removes_created_container() {
        let workspace = tempfile::tempdir().unwrap();
        let runtime = InMemoryContainerRuntime::new();
        runtime.fail_on(FailOn::Start, "no such image");
        let provisioner = ContainerProvisioner::new(Arc::new(runtime.clone()));
        let req = request(workspace.path(), workspace.path(), ConfigOverrides::default());

        let err = provisioner.ensure_running(&req, false).await.unwrap_err();
        assert_eq!(err.failed_step(), Some(Step::Provision));
        assert!(runtime.container_names().is_empty());
    }
}
