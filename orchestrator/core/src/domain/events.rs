// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent lifecycle domain events, published on the in-process
//! [`EventBus`](crate::infrastructure::event_bus::EventBus) as an agent moves
//! through `REQUESTED → PROVISIONING → RUNNING → STOPPED → REMOVED`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, LifecycleState};
use crate::domain::errors::Step;
use crate::domain::project::ProjectId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentLifecycleEvent {
    StateChanged {
        agent_id: AgentId,
        from: LifecycleState,
        to: LifecycleState,
        changed_at: DateTime<Utc>,
    },
    ProjectCreated {
        project_id: ProjectId,
        path: String,
        created_at: DateTime<Utc>,
    },
    ContainerProvisioned {
        agent_id: AgentId,
        handle: String,
        image: Option<String>,
        provisioned_at: DateTime<Utc>,
    },
    ContainerReady {
        agent_id: AgentId,
        handle: String,
        ready_at: DateTime<Utc>,
    },
    SessionBootstrapped {
        agent_id: AgentId,
        session: String,
        created: bool,
        bootstrapped_at: DateTime<Utc>,
    },
    AgentCreated {
        agent_id: AgentId,
        project_id: ProjectId,
        branch: String,
        created_at: DateTime<Utc>,
    },
    AgentStarted {
        agent_id: AgentId,
        started_at: DateTime<Utc>,
    },
    AgentStopped {
        agent_id: AgentId,
        stopped_at: DateTime<Utc>,
    },
    AgentRemoved {
        agent_id: AgentId,
        removed_at: DateTime<Utc>,
    },
    AgentFailed {
        agent_id: AgentId,
        step: Option<Step>,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    CreateRolledBack {
        agent_id: AgentId,
        handle: String,
        outcome: String,
        rolled_back_at: DateTime<Utc>,
    },
    OrphanRemoved {
        handle: String,
        removed_at: DateTime<Utc>,
    },
}

impl AgentLifecycleEvent {
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            AgentLifecycleEvent::StateChanged { agent_id, .. }
            | AgentLifecycleEvent::ContainerProvisioned { agent_id, .. }
            | AgentLifecycleEvent::ContainerReady { agent_id, .. }
            | AgentLifecycleEvent::SessionBootstrapped { agent_id, .. }
            | AgentLifecycleEvent::AgentCreated { agent_id, .. }
            | AgentLifecycleEvent::AgentStarted { agent_id, .. }
            | AgentLifecycleEvent::AgentStopped { agent_id, .. }
            | AgentLifecycleEvent::AgentRemoved { agent_id, .. }
            | AgentLifecycleEvent::AgentFailed { agent_id, .. }
            | AgentLifecycleEvent::CreateRolledBack { agent_id, .. } => Some(agent_id),
            AgentLifecycleEvent::ProjectCreated { .. } | AgentLifecycleEvent::OrphanRemoved { .. } => None,
        }
    }
}
