// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Runtime Capability
//!
//! The orchestrator reaches the container runtime only through
//! [`ContainerRuntime`]. Every call is addressed by the deterministic
//! container name; no opaque runtime ids leak into the domain.
//!
//! Implementations:
//! - `DockerRuntime` (bollard) in `crate::infrastructure::runtime`
//! - `InMemoryContainerRuntime` in `crate::infrastructure::in_memory_runtime`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Label keys stamped on every managed container.
pub mod labels {
    pub const MANAGED: &str = "magents.managed";
    pub const AGENT_ID: &str = "magents.agent.id";
    pub const BRANCH: &str = "magents.agent.branch";
    pub const PROJECT_ID: &str = "magents.project.id";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    /// Host path for bind mounts, volume name for volumes.
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self { kind: MountKind::Bind, source: source.into(), target: target.into(), read_only: false }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self { kind: MountKind::Volume, source: name.into(), target: target.into(), read_only: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
}

/// Everything the runtime needs to create one agent container.
#[derive(Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub limits: ResourceLimits,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
}

// Env carries credentials; only the keys are printed.
impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("mounts", &self.mounts)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("labels", &self.labels)
            .field("limits", &self.limits)
            .field("entrypoint", &self.entrypoint)
            .field("cmd", &self.cmd)
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// States in which the container still holds a process that `stop` acts on.
    pub fn is_active(&self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Paused | ContainerState::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => f.write_str("created"),
            ContainerState::Running => f.write_str("running"),
            ContainerState::Paused => f.write_str("paused"),
            ContainerState::Restarting => f.write_str("restarting"),
            ContainerState::Removing => f.write_str("removing"),
            ContainerState::Exited => f.write_str("exited"),
            ContainerState::Dead => f.write_str("dead"),
            ContainerState::Unknown(s) => write!(f, "unknown({})", s),
        }
    }
}

/// Result of a declared health check. Absent when the image declares none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Starting => f.write_str("starting"),
            HealthState::Healthy => f.write_str("healthy"),
            HealthState::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub state: ContainerState,
    pub health: Option<HealthState>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ContainerInfo {
    /// Running, and healthy when a health check is declared.
    pub fn is_ready(&self) -> bool {
        self.state.is_running() && matches!(self.health, None | Some(HealthState::Healthy))
    }

    pub fn is_managed(&self) -> bool {
        self.labels.get(labels::MANAGED).map(|v| v == "true").unwrap_or(false)
    }

    pub fn agent_label(&self) -> Option<&str> {
        self.labels.get(labels::AGENT_ID).map(String::as_str)
    }

    /// `running`, or `running (starting)` when a health check is pending.
    pub fn status_summary(&self) -> String {
        match self.health {
            Some(health) => format!("{} ({})", self.state, health),
            None => self.state.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container runtime rejected request: {0}")]
    Rejected(String),
    #[error("exec in container failed: {0}")]
    ExecFailed(String),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container named `spec.name`.
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stopping an already stopped container succeeds.
    async fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// `Ok(None)` when no container carries that name.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    /// Capability probe used to pick the auth-enabled image.
    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// All containers labelled `magents.managed=true`, running or not.
    async fn list_managed(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: ContainerState, health: Option<HealthState>) -> ContainerInfo {
        ContainerInfo { name: "magents-a".into(), state, health, labels: BTreeMap::new(), image: None }
    }

    #[test]
    fn test_readiness_without_health_check() {
        assert!(info(ContainerState::Running, None).is_ready());
        assert!(!info(ContainerState::Created, None).is_ready());
    }

    #[test]
    fn test_readiness_with_health_check() {
        assert!(!info(ContainerState::Running, Some(HealthState::Starting)).is_ready());
        assert!(!info(ContainerState::Running, Some(HealthState::Unhealthy)).is_ready());
        assert!(info(ContainerState::Running, Some(HealthState::Healthy)).is_ready());
        assert_eq!(
            info(ContainerState::Running, Some(HealthState::Starting)).status_summary(),
            "running (starting)"
        );
    }

    #[test]
    fn test_spec_debug_hides_env_values() {
        let spec = ContainerSpec {
            name: "magents-a".into(),
            image: "img".into(),
            mounts: vec![],
            env: BTreeMap::from([("ANTHROPIC_API_KEY".to_string(), "sk-secret".to_string())]),
            labels: BTreeMap::new(),
            limits: ResourceLimits::default(),
            entrypoint: None,
            cmd: vec![],
            working_dir: None,
        };
        let rendered = format!("{:?}", spec);
        assert!(rendered.contains("ANTHROPIC_API_KEY"));
        assert!(!rendered.contains("sk-secret"));
    }
}
