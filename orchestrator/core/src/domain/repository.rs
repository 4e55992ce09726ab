// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the two aggregate roots, following the DDD
//! Repository pattern: one repository per aggregate, interface defined in
//! the domain layer, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ProjectRepository` | `Project` | `InMemoryRegistry`, `SqliteRegistry` |
//! | `AgentRepository` | `Agent` | `InMemoryRegistry`, `SqliteRegistry` |
//!
//! ## Consistency
//!
//! Writes are atomic per entity. Project updates compare-and-swap on
//! `Project::version`; agent status updates compare-and-swap on the status
//! the caller last read. Reads always go to durable state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::project::{Project, ProjectId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub database_path: PathBuf,
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the id or path is taken.
    async fn create_project(&self, project: &Project) -> Result<(), RepositoryError>;

    async fn find_project_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;

    /// `path` must already be normalized.
    async fn find_project_by_path(&self, path: &Path) -> Result<Option<Project>, RepositoryError>;

    /// Write `project` if the stored version still equals `project.version`.
    /// Returns the stored project with its bumped version.
    async fn update_project(&self, project: &Project) -> Result<Project, RepositoryError>;

    async fn list_projects(&self) -> Result<Vec<Project>, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the id is taken.
    async fn create_agent(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError>;

    /// Set `next` only if the stored status is still `expected`.
    async fn update_agent_status(
        &self,
        id: &AgentId,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<Agent, RepositoryError>;

    /// Fails with `NotFound` when no record exists.
    async fn remove_agent(&self, id: &AgentId) -> Result<(), RepositoryError>;
}

/// The full registry surface used by the orchestrator.
pub trait Registry: ProjectRepository + AgentRepository {}

impl<T: ProjectRepository + AgentRepository> Registry for T {}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Concurrent modification of {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record migration failed: {0}")]
    Migration(String),
}

impl RepositoryError {
    /// Conflicts and transient database errors can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Conflict(_) | RepositoryError::Database(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::AlreadyExists(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                RepositoryError::Serialization(err.to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
