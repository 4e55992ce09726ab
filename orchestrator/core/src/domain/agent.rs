// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! An agent is one container-backed development environment bound to a
//! branch and owned by exactly one [`Project`](crate::domain::project::Project).
//!
//! The container handle is a pure function of the agent id, so status
//! queries never need a side table:
//!
//! ```text
//! handle = "<prefix>-" + agent_id        e.g. "magents-demo-1"
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent identity, status and lifecycle transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::project::ProjectId;

/// Prefix used for container and session names when none is configured.
pub const DEFAULT_HANDLE_PREFIX: &str = "magents";

const MAX_AGENT_ID_LEN: usize = 63;

/// Caller-supplied or generated agent identifier.
///
/// Restricted to characters Docker accepts in container names
/// (`[A-Za-z0-9][A-Za-z0-9_.-]*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentIdError {
    #[error("agent id cannot be empty")]
    Empty,
    #[error("agent id is {0} characters long (max 63)")]
    TooLong(usize),
    #[error("agent id must start with a letter or digit")]
    InvalidStart,
    #[error("agent id contains invalid character '{0}'")]
    InvalidCharacter(char),
}

impl AgentId {
    pub fn parse(raw: &str) -> Result<Self, AgentIdError> {
        let mut chars = raw.chars();
        let first = chars.next().ok_or(AgentIdError::Empty)?;
        if raw.len() > MAX_AGENT_ID_LEN {
            return Err(AgentIdError::TooLong(raw.len()));
        }
        if !first.is_ascii_alphanumeric() {
            return Err(AgentIdError::InvalidStart);
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '-' | '_' | '.'))) {
            return Err(AgentIdError::InvalidCharacter(bad));
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a fresh id of the form `agent-<8 hex>`.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("agent-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = AgentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = AgentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Deterministic name addressing an agent's container and tmux session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn for_agent(prefix: &str, id: &AgentId) -> Self {
        Self(format!("{}-{}", prefix, id))
    }

    /// Wrap a name read back from the runtime or an old registry record.
    pub fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// tmux session name for this handle. tmux rewrites `.` and `:` in
    /// session names and reads them as separators inside `-t` targets.
    pub fn session_name(&self) -> String {
        self.0.replace(['.', ':'], "_")
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted agent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Running,
    Stopped,
    Error,
    Removed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Running => "RUNNING",
            AgentStatus::Stopped => "STOPPED",
            AgentStatus::Error => "ERROR",
            AgentStatus::Removed => "REMOVED",
        }
    }

    /// Live agents count against the agent limit.
    pub fn is_live(&self) -> bool {
        !matches!(self, AgentStatus::Removed)
    }

    /// Parse statuses written by current and older registries.
    ///
    /// Older records used lowercase names and a handful of runtime-derived
    /// values (`CREATED`, `EXITED`, `FAILED`).
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" | "ACTIVE" => Some(AgentStatus::Running),
            "STOPPED" | "CREATED" | "EXITED" | "PAUSED" => Some(AgentStatus::Stopped),
            "ERROR" | "FAILED" | "DEAD" => Some(AgentStatus::Error),
            "REMOVED" => Some(AgentStatus::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s).ok_or_else(|| format!("unknown agent status '{}'", s))
    }
}

/// Orchestration-level lifecycle of an agent.
///
/// `Requested` and `Provisioning` exist only while a create call is in
/// flight; the remaining states mirror [`AgentStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Requested,
    Provisioning,
    Running,
    Stopped,
    Removed,
    Error,
}

impl LifecycleState {
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Requested, Provisioning)
                | (Requested, Error)
                | (Provisioning, Running)
                | (Provisioning, Error)
                | (Provisioning, Removed)
                | (Running, Stopped)
                | (Running, Removed)
                | (Running, Error)
                | (Stopped, Running)
                | (Stopped, Removed)
                | (Stopped, Error)
                | (Error, Running)
                | (Error, Stopped)
                | (Error, Removed)
        )
    }
}

impl From<AgentStatus> for LifecycleState {
    fn from(status: AgentStatus) -> Self {
        match status {
            AgentStatus::Running => LifecycleState::Running,
            AgentStatus::Stopped => LifecycleState::Stopped,
            AgentStatus::Error => LifecycleState::Error,
            AgentStatus::Removed => LifecycleState::Removed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Requested => "REQUESTED",
            LifecycleState::Provisioning => "PROVISIONING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Removed => "REMOVED",
            LifecycleState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub branch: String,
    pub project_id: ProjectId,
    pub workspace_path: PathBuf,
    pub handle: ContainerHandle,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        id: AgentId,
        branch: impl Into<String>,
        project_id: ProjectId,
        workspace_path: PathBuf,
        handle: ContainerHandle,
        status: AgentStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            branch: branch.into(),
            project_id,
            workspace_path,
            handle,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reject branch names git itself would refuse.
pub fn validate_branch(branch: &str) -> Result<(), String> {
    if branch.trim().is_empty() {
        return Err("branch name cannot be empty".to_string());
    }
    if branch.starts_with('-') || branch.starts_with('/') || branch.ends_with('/') {
        return Err(format!("invalid branch name '{}'", branch));
    }
    if branch.ends_with(".lock") || branch.contains("..") || branch.contains("@{") || branch.contains("//") {
        return Err(format!("invalid branch name '{}'", branch));
    }
    if branch
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(format!("branch name '{}' contains a forbidden character", branch));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_validation() {
        assert!(AgentId::parse("demo-1").is_ok());
        assert!(AgentId::parse("agent_2.x").is_ok());
        assert_eq!(AgentId::parse(""), Err(AgentIdError::Empty));
        assert_eq!(AgentId::parse("-lead"), Err(AgentIdError::InvalidStart));
        assert_eq!(AgentId::parse("a b"), Err(AgentIdError::InvalidCharacter(' ')));
        assert_eq!(AgentId::parse("feature/x"), Err(AgentIdError::InvalidCharacter('/')));
        assert!(matches!(AgentId::parse(&"a".repeat(64)), Err(AgentIdError::TooLong(64))));
    }

    #[test]
    fn test_session_name_avoids_tmux_separators() {
        let id = AgentId::parse("agent_2.x").unwrap();
        let handle = ContainerHandle::for_agent(DEFAULT_HANDLE_PREFIX, &id);
        assert_eq!(handle.as_str(), "magents-agent_2.x");
        assert_eq!(handle.session_name(), "magents-agent_2_x");
        assert_eq!(ContainerHandle::from_raw("legacy:1").session_name(), "legacy_1");
        assert_eq!(ContainerHandle::from_raw("magents-demo-1").session_name(), "magents-demo-1");
    }

    #[test]
    fn test_generated_ids_are_valid() {
        let id = AgentId::generate();
        assert!(id.as_str().starts_with("agent-"));
        assert_eq!(id.as_str().len(), "agent-".len() + 8);
        assert!(AgentId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_handle_is_pure_function_of_id() {
        let id = AgentId::parse("demo-1").unwrap();
        assert_eq!(ContainerHandle::for_agent("magents", &id).as_str(), "magents-demo-1");
        assert_eq!(
            ContainerHandle::for_agent("magents", &id),
            ContainerHandle::for_agent("magents", &id)
        );
    }

    #[test]
    fn test_lenient_status_parsing() {
        assert_eq!(AgentStatus::parse_lenient("running"), Some(AgentStatus::Running));
        assert_eq!(AgentStatus::parse_lenient("CREATED"), Some(AgentStatus::Stopped));
        assert_eq!(AgentStatus::parse_lenient("failed"), Some(AgentStatus::Error));
        assert_eq!(AgentStatus::parse_lenient("bogus"), None);
        assert!(!AgentStatus::Removed.is_live());
        assert!(AgentStatus::Stopped.is_live());
    }

    #[test]
    fn test_lifecycle_transitions() {
        use LifecycleState::*;
        assert!(Requested.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Running));
        assert!(Provisioning.can_transition_to(Error));
        assert!(Running.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Removed));
        assert!(!Removed.can_transition_to(Running));
        assert!(!Requested.can_transition_to(Running));
    }

    #[test]
    fn test_branch_validation() {
        assert!(validate_branch("feature/x").is_ok());
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("bad branch").is_err());
        assert!(validate_branch("a..b").is_err());
        assert!(validate_branch("-x").is_err());
        assert!(validate_branch("topic.lock").is_err());
    }

    #[test]
    fn test_agent_id_serde_rejects_invalid() {
        let ok: AgentId = serde_json::from_str("\"demo-1\"").unwrap();
        assert_eq!(ok.as_str(), "demo-1");
        assert!(serde_json::from_str::<AgentId>("\"bad id\"").is_err());
    }
}
