// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Registry
//!
//! Durable `ProjectRepository` + `AgentRepository` implementation backed by
//! the `projects` and `agents` tables (see [`Database`]).
//!
//! Rows are read into versioned records ([`AgentRecord`], [`ProjectRecord`])
//! and migrated to the current domain shape on read. Any write to a row
//! persists it in the current schema version.
//!
//! Compare-and-swap is expressed in the `WHERE` clause of each `UPDATE`;
//! zero affected rows means another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::warn;

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::project::{Project, ProjectId};
use crate::domain::record::{AgentRecord, MigrationError, ProjectRecord, CURRENT_SCHEMA_VERSION};
use crate::domain::repository::{AgentRepository, ProjectRepository, RepositoryError};
use crate::infrastructure::db::Database;

const PROJECT_COLUMNS: &str =
    "id, name, path, status, max_agents, project_type, agent_ids, version, schema_version, created_at, updated_at";
const AGENT_COLUMNS: &str =
    "id, project_id, branch, workspace_path, handle, status, schema_version, created_at, updated_at";

pub struct SqliteRegistry {
    db: Database,
    handle_prefix: String,
}

impl SqliteRegistry {
    /// `handle_prefix` is used to recompute handles of v1 agent rows.
    pub fn new(db: Database, handle_prefix: impl Into<String>) -> Self {
        Self { db, handle_prefix: handle_prefix.into() }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.db.get_pool()
    }

    fn project_from_row(row: &SqliteRow) -> Result<Project, RepositoryError> {
        let schema_version: i64 = row.try_get("schema_version")?;
        let record = ProjectRecord {
            schema_version: u32::try_from(schema_version).unwrap_or(0),
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            path: row.try_get("path")?,
            status: row.try_get("status")?,
            max_agents: row.try_get("max_agents")?,
            project_type: row.try_get("project_type")?,
            agent_ids: row.try_get("agent_ids")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        record.migrate().map_err(migration_error)
    }

    fn agent_record(row: &SqliteRow) -> Result<AgentRecord, RepositoryError> {
        let schema_version: i64 = row.try_get("schema_version")?;
        let id: String = row.try_get("id")?;
        let branch: Option<String> = row.try_get("branch")?;
        let workspace_path: Option<String> = row.try_get("workspace_path")?;
        let status: String = row.try_get("status")?;
        let created_at: Option<DateTime<Utc>> = row.try_get("created_at")?;

        match schema_version {
            1 => Ok(AgentRecord::V1 { id, branch, workspace_path, status, created_at }),
            2 => {
                let project_id: Option<String> = row.try_get("project_id")?;
                let handle: Option<String> = row.try_get("handle")?;
                let updated_at: Option<DateTime<Utc>> = row.try_get("updated_at")?;
                let missing = |field: &'static str| migration_error(MigrationError::MissingField { id: id.clone(), field });
                Ok(AgentRecord::V2 {
                    branch: branch.ok_or_else(|| missing("branch"))?,
                    project_id: project_id.ok_or_else(|| missing("project_id"))?,
                    workspace_path: workspace_path.ok_or_else(|| missing("workspace_path"))?,
                    handle: handle.ok_or_else(|| missing("handle"))?,
                    created_at: created_at.ok_or_else(|| missing("created_at"))?,
                    updated_at: updated_at.ok_or_else(|| missing("updated_at"))?,
                    id,
                    status,
                })
            }
            other => Err(migration_error(MigrationError::UnsupportedVersion(u32::try_from(other).unwrap_or(u32::MAX)))),
        }
    }

    fn agent_from_row(&self, row: &SqliteRow) -> Result<Agent, RepositoryError> {
        Self::agent_record(row)?.migrate(&self.handle_prefix).map_err(migration_error)
    }

    async fn project_exists(&self, id: &ProjectId) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }
}

fn migration_error(err: MigrationError) -> RepositoryError {
    RepositoryError::Migration(err.to_string())
}

fn agent_ids_json(project: &Project) -> Result<String, RepositoryError> {
    let ids: Vec<&str> = project.agent_ids.iter().map(AgentId::as_str).collect();
    Ok(serde_json::to_string(&ids)?)
}

fn project_type_json(project: &Project) -> Result<Option<String>, RepositoryError> {
    project.project_type.as_ref().map(serde_json::to_string).transpose().map_err(RepositoryError::from)
}

#[async_trait]
impl ProjectRepository for SqliteRegistry {
    async fn create_project(&self, project: &Project) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, path, status, max_agents, project_type,
                agent_ids, version, schema_version, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(project.id.as_str())
        .bind(&project.name)
        .bind(project.path.to_string_lossy().into_owned())
        .bind(project.status.as_str())
        .bind(i64::from(project.max_agents))
        .bind(project_type_json(project)?)
        .bind(agent_ids_json(project)?)
        .bind(project.version as i64)
        .bind(CURRENT_SCHEMA_VERSION as i64)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn find_project_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(Self::project_from_row).transpose()
    }

    async fn find_project_by_path(&self, path: &Path) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM projects WHERE path = ?", PROJECT_COLUMNS))
            .bind(path.to_string_lossy().into_owned())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(Self::project_from_row).transpose()
    }

    async fn update_project(&self, project: &Project) -> Result<Project, RepositoryError> {
        let mut next = project.clone();
        next.version = project.version + 1;
        next.updated_at = Utc::now();

        // Rows written before versioning carry NULL, which reads as version 1
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                name = ?, status = ?, max_agents = ?, project_type = ?,
                agent_ids = ?, version = ?, schema_version = ?, updated_at = ?
            WHERE id = ? AND COALESCE(version, 1) = ?
            "#,
        )
        .bind(&next.name)
        .bind(next.status.as_str())
        .bind(i64::from(next.max_agents))
        .bind(project_type_json(&next)?)
        .bind(agent_ids_json(&next)?)
        .bind(next.version as i64)
        .bind(CURRENT_SCHEMA_VERSION as i64)
        .bind(next.updated_at)
        .bind(project.id.as_str())
        .bind(project.version as i64)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return if self.project_exists(&project.id).await? {
                Err(RepositoryError::Conflict(format!(
                    "project {} changed since version {}",
                    project.id, project.version
                )))
            } else {
                Err(RepositoryError::NotFound(format!("project {}", project.id)))
            };
        }

        Ok(next)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM projects ORDER BY created_at, id", PROJECT_COLUMNS))
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(Self::project_from_row).collect()
    }
}

#[async_trait]
impl AgentRepository for SqliteRegistry {
    async fn create_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, project_id, branch, workspace_path, handle, status,
                schema_version, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(agent.id.as_str())
        .bind(agent.project_id.as_str())
        .bind(&agent.branch)
        .bind(agent.workspace_path.to_string_lossy().into_owned())
        .bind(agent.handle.as_str())
        .bind(agent.status.as_str())
        .bind(CURRENT_SCHEMA_VERSION as i64)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = ?", AGENT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(|r| self.agent_from_row(r)).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM agents ORDER BY created_at, id", AGENT_COLUMNS))
            .fetch_all(self.pool())
            .await?;

        let mut agents = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.agent_from_row(row) {
                Ok(agent) => agents.push(agent),
                Err(RepositoryError::Migration(reason)) => {
                    warn!("Skipping unreadable agent record: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(agents)
    }

    async fn update_agent_status(
        &self,
        id: &AgentId,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<Agent, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = ?", AGENT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", id)))?;

        // Older rows may spell the same status differently; CAS on the raw value
        let raw_status: String = row.try_get("status")?;
        let mut agent = self.agent_from_row(&row)?;
        if agent.status != expected {
            return Err(RepositoryError::Conflict(format!(
                "agent {} (expected {}, found {})",
                id, expected, agent.status
            )));
        }
        agent.status = next;
        agent.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE agents SET
                project_id = ?, branch = ?, workspace_path = ?, handle = ?, status = ?,
                schema_version = ?, created_at = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(agent.project_id.as_str())
        .bind(&agent.branch)
        .bind(agent.workspace_path.to_string_lossy().into_owned())
        .bind(agent.handle.as_str())
        .bind(agent.status.as_str())
        .bind(CURRENT_SCHEMA_VERSION as i64)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .bind(id.as_str())
        .bind(&raw_status)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("agent {} changed concurrently", id)));
        }

        Ok(agent)
    }

    async fn remove_agent(&self, id: &AgentId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("agent {}", id)));
        }
        Ok(())
    }
}
