// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the registry traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve projects and agents
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SqliteRegistry** - durable registry shared by every `magents` process
//!   on the host (WAL mode, per-entity compare-and-swap)
//! - **InMemoryRegistry** - thread-safe map-backed storage for tests and
//!   dry runs
//!
//! Both enforce the same contract: unique ids and paths, version CAS on
//! projects, status CAS on agents.

pub mod sqlite;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::project::{Project, ProjectId};
use crate::domain::repository::{AgentRepository, ProjectRepository, RepositoryError};

#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    projects: Arc<RwLock<BTreeMap<ProjectId, Project>>>,
    agents: Arc<RwLock<BTreeMap<AgentId, Agent>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryRegistry {
    async fn create_project(&self, project: &Project) -> Result<(), RepositoryError> {
        let mut projects = self.projects.write();
        if projects.contains_key(&project.id) || projects.values().any(|p| p.path == project.path) {
            return Err(RepositoryError::AlreadyExists(format!("project {}", project.id)));
        }
        projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn find_project_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        Ok(self.projects.read().get(id).cloned())
    }

    async fn find_project_by_path(&self, path: &Path) -> Result<Option<Project>, RepositoryError> {
        Ok(self.projects.read().values().find(|p| p.path.as_path() == path).cloned())
    }

    async fn update_project(&self, project: &Project) -> Result<Project, RepositoryError> {
        let mut projects = self.projects.write();
        let stored = projects
            .get_mut(&project.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("project {}", project.id)))?;
        if stored.version != project.version {
            return Err(RepositoryError::Conflict(format!(
                "project {} (expected version {}, found {})",
                project.id, project.version, stored.version
            )));
        }
        let mut next = project.clone();
        next.version = stored.version + 1;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        let mut projects: Vec<Project> = self.projects.read().values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(projects)
    }
}

#[async_trait]
impl AgentRepository for InMemoryRegistry {
    async fn create_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write();
        if agents.contains_key(&agent.id) {
            return Err(RepositoryError::AlreadyExists(format!("agent {}", agent.id)));
        }
        agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn update_agent_status(
        &self,
        id: &AgentId,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<Agent, RepositoryError> {
        let mut agents = self.agents.write();
        let stored = agents
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", id)))?;
        if stored.status != expected {
            return Err(RepositoryError::Conflict(format!(
                "agent {} (expected {}, found {})",
                id, expected, stored.status
            )));
        }
        stored.status = next;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn remove_agent(&self, id: &AgentId) -> Result<(), RepositoryError> {
        self.agents
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", id)))
    }
}
