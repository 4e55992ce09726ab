// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator Error Taxonomy
//!
//! Every failure surfaced by the lifecycle orchestrator is one of these
//! variants. Each one reports the step that failed, whether repeating the
//! call is safe, and the process exit code / HTTP status it maps to.
//!
//! | Variant | Exit | HTTP |
//! |---------|------|------|
//! | `InvalidRequest` | 2 | 400 |
//! | `AlreadyExists` | 10 | 409 |
//! | `LimitExceeded` | 11 | 429 |
//! | `Provisioning` / `Staging` | 12 | 502 |
//! | `Conflict` | 13 | 409 |
//! | `HealthTimeout` | 14 | 504 |
//! | `NotFound` | 15 | 404 |
//! | `PartialFailure` | 16 | 207 |
//! | `Bootstrap` | 17 | 500 |
//! | `Store` | 18 | 503 |
//! | `Cancelled` | 19 | 408 |
//! | `CreateFailed` | wrapped | wrapped |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::agent::{AgentId, ContainerHandle};
use crate::domain::project::ProjectId;
use crate::domain::repository::RepositoryError;
use crate::domain::runtime::RuntimeError;
use crate::domain::session::SessionError;

/// Orchestration step names used in errors, events and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Validate,
    ResolveProject,
    ResolveConfig,
    Provision,
    AwaitReady,
    Bootstrap,
    RegisterAgent,
    AttachToProject,
    Stop,
    Remove,
    UpdateStatus,
    Rollback,
    Reconcile,
    Import,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Validate => "validate",
            Step::ResolveProject => "resolve-project",
            Step::ResolveConfig => "resolve-config",
            Step::Provision => "provision",
            Step::AwaitReady => "await-ready",
            Step::Bootstrap => "bootstrap",
            Step::RegisterAgent => "register-agent",
            Step::AttachToProject => "attach-to-project",
            Step::Stop => "stop",
            Step::Remove => "remove",
            Step::UpdateStatus => "update-status",
            Step::Rollback => "rollback",
            Step::Reconcile => "reconcile",
            Step::Import => "import",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "project_id", rename_all = "snake_case")]
pub enum LimitScope {
    Project(ProjectId),
    Global,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Project(id) => write!(f, "project '{}'", id),
            LimitScope::Global => f.write_str("global"),
        }
    }
}

/// One failed item of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: String,
    pub step: Option<Step>,
    pub message: String,
    pub retryable: bool,
}

impl ItemFailure {
    pub fn from_error(id: impl Into<String>, err: &OrchestratorError) -> Self {
        Self { id: id.into(), step: err.failed_step(), message: err.to_string(), retryable: err.is_retryable() }
    }
}

/// What happened to a container created by a create call that failed later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    ContainerRemoved,
    /// The container could not be removed; `reconcile --fix-orphaned` will.
    OrphanLeft { handle: String, reason: String },
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::ContainerRemoved => f.write_str("container removed"),
            RollbackOutcome::OrphanLeft { handle, reason } => {
                write!(f, "orphan left: container '{}' ({}); run `agent reconcile --fix-orphaned`", handle, reason)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("agent '{0}' already exists")]
    AlreadyExists(AgentId),

    #[error("{scope} agent limit reached ({live}/{max} live agents)")]
    LimitExceeded { scope: LimitScope, live: usize, max: u32 },

    #[error("provisioning failed at {step}: {source}")]
    Provisioning {
        step: Step,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to stage {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("container '{handle}' already exists and is not tracked by the registry ({detail})")]
    Conflict { handle: ContainerHandle, detail: String },

    #[error("container '{handle}' not ready after {:.1}s (last status: {last_status})", .elapsed.as_secs_f64())]
    HealthTimeout {
        handle: ContainerHandle,
        elapsed: Duration,
        last_status: String,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{} operations failed, {succeeded} succeeded", .failures.len())]
    PartialFailure { succeeded: usize, failures: Vec<ItemFailure> },

    #[error("session bootstrap failed: {0}")]
    Bootstrap(#[source] SessionError),

    #[error("registry error at {step}: {source}")]
    Store {
        step: Step,
        #[source]
        source: RepositoryError,
    },

    #[error("wait for '{handle}' cancelled after {:.1}s", .elapsed.as_secs_f64())]
    Cancelled { handle: ContainerHandle, elapsed: Duration },

    #[error("{source}; rollback: {rollback}")]
    CreateFailed {
        source: Box<OrchestratorError>,
        rollback: RollbackOutcome,
    },
}

impl OrchestratorError {
    pub fn store(step: Step, source: RepositoryError) -> Self {
        OrchestratorError::Store { step, source }
    }

    pub fn provisioning(step: Step, source: RuntimeError) -> Self {
        OrchestratorError::Provisioning { step, source }
    }

    pub fn agent_not_found(id: impl fmt::Display) -> Self {
        OrchestratorError::NotFound { kind: "agent", id: id.to_string() }
    }

    /// The step at which the operation stopped, when one applies.
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            OrchestratorError::InvalidRequest(_)
            | OrchestratorError::AlreadyExists(_)
            | OrchestratorError::LimitExceeded { .. } => Some(Step::Validate),
            OrchestratorError::Provisioning { step, .. } | OrchestratorError::Store { step, .. } => Some(*step),
            OrchestratorError::Staging { .. } | OrchestratorError::Conflict { .. } => Some(Step::Provision),
            OrchestratorError::HealthTimeout { .. } | OrchestratorError::Cancelled { .. } => Some(Step::AwaitReady),
            OrchestratorError::Bootstrap(_) => Some(Step::Bootstrap),
            OrchestratorError::NotFound { .. } | OrchestratorError::PartialFailure { .. } => None,
            OrchestratorError::CreateFailed { source, .. } => source.failed_step(),
        }
    }

    /// Whether repeating the same call is safe without manual cleanup.
    ///
    /// Bootstrap re-entry is always safe. A failed create is safe to retry
    /// only when its container was rolled back.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Bootstrap(_)
            | OrchestratorError::HealthTimeout { .. }
            | OrchestratorError::Cancelled { .. }
            | OrchestratorError::Staging { .. } => true,
            OrchestratorError::Provisioning { source, .. } => matches!(source, RuntimeError::Unreachable(_)),
            OrchestratorError::Store { source, .. } => source.is_retryable(),
            OrchestratorError::PartialFailure { failures, .. } => failures.iter().all(|f| f.retryable),
            OrchestratorError::CreateFailed { source, rollback } => {
                matches!(rollback, RollbackOutcome::ContainerRemoved) && source.is_retryable()
            }
            OrchestratorError::InvalidRequest(_)
            | OrchestratorError::AlreadyExists(_)
            | OrchestratorError::LimitExceeded { .. }
            | OrchestratorError::Conflict { .. }
            | OrchestratorError::NotFound { .. } => false,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidRequest(_) => "invalid_request",
            OrchestratorError::AlreadyExists(_) => "already_exists",
            OrchestratorError::LimitExceeded { .. } => "limit_exceeded",
            OrchestratorError::Provisioning { .. } | OrchestratorError::Staging { .. } => "provisioning",
            OrchestratorError::Conflict { .. } => "conflict",
            OrchestratorError::HealthTimeout { .. } => "health_timeout",
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::PartialFailure { .. } => "partial_failure",
            OrchestratorError::Bootstrap(_) => "bootstrap",
            OrchestratorError::Store { .. } => "store",
            OrchestratorError::Cancelled { .. } => "cancelled",
            OrchestratorError::CreateFailed { source, .. } => source.code(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::InvalidRequest(_) => 2,
            OrchestratorError::AlreadyExists(_) => 10,
            OrchestratorError::LimitExceeded { .. } => 11,
            OrchestratorError::Provisioning { .. } | OrchestratorError::Staging { .. } => 12,
            OrchestratorError::Conflict { .. } => 13,
            OrchestratorError::HealthTimeout { .. } => 14,
            OrchestratorError::NotFound { .. } => 15,
            OrchestratorError::PartialFailure { .. } => 16,
            OrchestratorError::Bootstrap(_) => 17,
            OrchestratorError::Store { .. } => 18,
            OrchestratorError::Cancelled { .. } => 19,
            OrchestratorError::CreateFailed { source, .. } => source.exit_code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::InvalidRequest(_) => 400,
            OrchestratorError::AlreadyExists(_) | OrchestratorError::Conflict { .. } => 409,
            OrchestratorError::LimitExceeded { .. } => 429,
            OrchestratorError::Provisioning { .. } | OrchestratorError::Staging { .. } => 502,
            OrchestratorError::HealthTimeout { .. } => 504,
            OrchestratorError::NotFound { .. } => 404,
            OrchestratorError::PartialFailure { .. } => 207,
            OrchestratorError::Bootstrap(_) => 500,
            OrchestratorError::Store { .. } => 503,
            OrchestratorError::Cancelled { .. } => 408,
            OrchestratorError::CreateFailed { source, .. } => source.http_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_map_to_validate_step() {
        let err = OrchestratorError::AlreadyExists(AgentId::parse("demo-1").unwrap());
        assert_eq!(err.failed_step(), Some(Step::Validate));
        assert_eq!(err.exit_code(), 10);
        assert_eq!(err.http_status(), 409);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_create_failed_delegates_to_source() {
        let inner = OrchestratorError::HealthTimeout {
            handle: ContainerHandle::from_raw("magents-a"),
            elapsed: Duration::from_secs(30),
            last_status: "created".into(),
        };
        let err = OrchestratorError::CreateFailed {
            source: Box::new(inner),
            rollback: RollbackOutcome::ContainerRemoved,
        };
        assert_eq!(err.failed_step(), Some(Step::AwaitReady));
        assert_eq!(err.exit_code(), 14);
        assert_eq!(err.code(), "health_timeout");
        assert!(err.is_retryable());

        let orphaned = OrchestratorError::CreateFailed {
            source: Box::new(OrchestratorError::Bootstrap(SessionError::CommandFailed {
                command: "tmux".into(),
                exit_code: 1,
                stderr: "boom".into(),
            })),
            rollback: RollbackOutcome::OrphanLeft { handle: "magents-a".into(), reason: "unreachable".into() },
        };
        assert!(!orphaned.is_retryable());
        assert!(orphaned.to_string().contains("reconcile --fix-orphaned"));
    }

    #[test]
    fn test_partial_failure_message_counts() {
        let err = OrchestratorError::PartialFailure {
            succeeded: 2,
            failures: vec![ItemFailure { id: "c".into(), step: Some(Step::Stop), message: "gone".into(), retryable: false }],
        };
        assert_eq!(err.to_string(), "1 operations failed, 2 succeeded");
        assert_eq!(err.exit_code(), 16);
    }

    #[test]
    fn test_health_timeout_message() {
        let err = OrchestratorError::HealthTimeout {
            handle: ContainerHandle::from_raw("magents-a"),
            elapsed: Duration::from_secs(5),
            last_status: "created".into(),
        };
        assert_eq!(err.to_string(), "container 'magents-a' not ready after 5.0s (last status: created)");
    }
}
