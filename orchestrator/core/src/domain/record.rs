// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Versioned Registry Records
//!
//! Stored agent and project shapes carry a schema version. Older shapes are
//! upgraded to the current domain types in one place, on read, instead of
//! sprinkling optional-field fallbacks through every query.
//!
//! | Version | Shape |
//! |---------|-------|
//! | 1 | Agents without `project_id`/`handle`; projects without `version`/`project_type`. Also the legacy `docker_agents.json` array. |
//! | 2 | Current columns. |
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Schema evolution for persisted records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::agent::{Agent, AgentId, AgentStatus, ContainerHandle};
use crate::domain::project::{normalize_lexically, project_name_for, Project, ProjectId, ProjectStatus, ProjectType};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

const DEFAULT_LEGACY_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MigrationError {
    #[error("record '{id}' is missing required field '{field}'")]
    MissingField { id: String, field: &'static str },
    #[error("record '{id}' has invalid {field}: {reason}")]
    InvalidField { id: String, field: &'static str, reason: String },
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u32),
}

/// One entry of the legacy `~/.magents/docker_agents.json` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAgentEntry {
    pub id: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub repo_root: Option<String>,
    #[serde(default)]
    pub tmux_session: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// An agent row as read from storage, before migration.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRecord {
    V1 {
        id: String,
        branch: Option<String>,
        workspace_path: Option<String>,
        status: String,
        created_at: Option<DateTime<Utc>>,
    },
    V2 {
        id: String,
        branch: String,
        project_id: String,
        workspace_path: String,
        handle: String,
        status: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
}

impl AgentRecord {
    pub fn schema_version(&self) -> u32 {
        match self {
            AgentRecord::V1 { .. } => 1,
            AgentRecord::V2 { .. } => 2,
        }
    }

    pub fn from_legacy(entry: LegacyAgentEntry) -> Self {
        // The Docker-era manager stored the repo root as both fields.
        let workspace_path = entry.repo_root.or(entry.worktree_path);
        AgentRecord::V1 {
            id: entry.id,
            branch: entry.branch,
            workspace_path,
            status: entry.status.unwrap_or_else(|| "STOPPED".to_string()),
            created_at: entry.created_at,
        }
    }

    /// Upgrade to the current [`Agent`] shape.
    ///
    /// v1 records get their handle recomputed from the id and their project
    /// id derived from the workspace path, exactly as a fresh create would.
    pub fn migrate(self, handle_prefix: &str) -> Result<Agent, MigrationError> {
        match self {
            AgentRecord::V1 { id, branch, workspace_path, status, created_at } => {
                let agent_id = parse_id(&id)?;
                let workspace = workspace_path
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| normalize_lexically(&PathBuf::from(p)))
                    .ok_or_else(|| MigrationError::MissingField { id: id.clone(), field: "workspace_path" })?;
                let project_id = ProjectId::derive(&project_name_for(&workspace), &workspace);
                let created_at = created_at.unwrap_or_else(Utc::now);
                Ok(Agent {
                    handle: ContainerHandle::for_agent(handle_prefix, &agent_id),
                    id: agent_id,
                    branch: branch.filter(|b| !b.is_empty()).unwrap_or_else(|| DEFAULT_LEGACY_BRANCH.to_string()),
                    project_id,
                    workspace_path: workspace,
                    // Docker-era records used REMOVED for containers that were gone but still listed.
                    status: match parse_status(&id, &status)? {
                        AgentStatus::Removed => AgentStatus::Stopped,
                        other => other,
                    },
                    created_at,
                    updated_at: created_at,
                })
            }
            AgentRecord::V2 { id, branch, project_id, workspace_path, handle, status, created_at, updated_at } => {
                let agent_id = parse_id(&id)?;
                Ok(Agent {
                    status: parse_status(&id, &status)?,
                    id: agent_id,
                    branch,
                    project_id: ProjectId::from_raw(project_id),
                    workspace_path: PathBuf::from(workspace_path),
                    handle: ContainerHandle::from_raw(handle),
                    created_at,
                    updated_at,
                })
            }
        }
    }
}

/// A project row as read from storage, before migration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub schema_version: u32,
    pub id: String,
    pub name: String,
    pub path: String,
    pub status: String,
    pub max_agents: i64,
    pub project_type: Option<String>,
    pub agent_ids: String,
    pub version: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn migrate(self) -> Result<Project, MigrationError> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(MigrationError::UnsupportedVersion(self.schema_version));
        }
        let agent_ids: Vec<String> = serde_json::from_str(&self.agent_ids).map_err(|e| MigrationError::InvalidField {
            id: self.id.clone(),
            field: "agent_ids",
            reason: e.to_string(),
        })?;
        let agent_ids = agent_ids.iter().map(|raw| parse_id(raw)).collect::<Result<Vec<_>, _>>()?;

        let project_type = match (self.schema_version, self.project_type) {
            (1, _) | (_, None) => None,
            (_, Some(raw)) => Some(serde_json::from_str::<ProjectType>(&raw).map_err(|e| {
                MigrationError::InvalidField { id: self.id.clone(), field: "project_type", reason: e.to_string() }
            })?),
        };

        let status = ProjectStatus::parse(&self.status).ok_or_else(|| MigrationError::InvalidField {
            id: self.id.clone(),
            field: "status",
            reason: format!("unknown project status '{}'", self.status),
        })?;

        Ok(Project {
            id: ProjectId::from_raw(self.id),
            name: self.name,
            path: PathBuf::from(self.path),
            status,
            max_agents: u32::try_from(self.max_agents).unwrap_or(0),
            project_type,
            agent_ids,
            version: self.version.and_then(|v| u64::try_from(v).ok()).unwrap_or(1),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_id(raw: &str) -> Result<AgentId, MigrationError> {
    AgentId::parse(raw).map_err(|e| MigrationError::InvalidField {
        id: raw.to_string(),
        field: "id",
        reason: e.to_string(),
    })
}

fn parse_status(id: &str, raw: &str) -> Result<AgentStatus, MigrationError> {
    AgentStatus::parse_lenient(raw).ok_or_else(|| MigrationError::InvalidField {
        id: id.to_string(),
        field: "status",
        reason: format!("unknown agent status '{}'", raw),
    })
}
