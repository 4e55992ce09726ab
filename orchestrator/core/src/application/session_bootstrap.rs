// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Bootstrapper
//!
//! Creates the agent's tmux session inside its container:
//!
//! ```text
//! <handle>
//! ├── main   agent command (when configured)
//! └── git    branch summary and common git commands
//! ```
//!
//! The session is named after the container handle with tmux's separator
//! characters replaced (`ContainerHandle::session_name`). When the session
//! already exists only the missing windows are created, so a bootstrap
//! interrupted halfway is completed by the next run.

use std::sync::Arc;
use tracing::info;

use crate::application::config_resolver::ResolvedConfiguration;
use crate::domain::agent::{AgentId, ContainerHandle};
use crate::domain::session::{SessionController, SessionError};

pub const PRIMARY_WINDOW: &str = "main";
pub const GIT_WINDOW: &str = "git";

/// Settings for one bootstrap run, taken from the resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub agent_command: Option<String>,
    pub workspace_dir: String,
}

impl SessionPlan {
    pub fn from_config(config: &ResolvedConfiguration) -> Self {
        Self { agent_command: config.agent_command.clone(), workspace_dir: config.workspace_dir.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Created,
    /// The session existed but lacked windows, which were added.
    Completed,
    AlreadyPresent,
}

pub struct SessionBootstrapper {
    sessions: Arc<dyn SessionController>,
}

impl SessionBootstrapper {
    pub fn new(sessions: Arc<dyn SessionController>) -> Self {
        Self { sessions }
    }

    pub async fn bootstrap(
        &self,
        handle: &ContainerHandle,
        agent_id: &AgentId,
        plan: &SessionPlan,
    ) -> Result<BootstrapOutcome, SessionError> {
        let session = handle.session_name();
        let main = format!("{}:{}", session, PRIMARY_WINDOW);

        let (outcome, windows) = if self.sessions.session_exists(handle, &session).await? {
            let windows = self.sessions.list_windows(handle, &session).await?;
            if windows.iter().any(|w| w == PRIMARY_WINDOW) && windows.iter().any(|w| w == GIT_WINDOW) {
                return Ok(BootstrapOutcome::AlreadyPresent);
            }
            (BootstrapOutcome::Completed, windows)
        } else {
            self.sessions.new_session(handle, &session, PRIMARY_WINDOW, &plan.workspace_dir).await?;
            self.send_agent_command(handle, &main, plan).await?;
            (BootstrapOutcome::Created, vec![PRIMARY_WINDOW.to_string()])
        };

        if !windows.iter().any(|w| w == PRIMARY_WINDOW) {
            self.sessions.new_window(handle, &session, PRIMARY_WINDOW, &plan.workspace_dir).await?;
            self.send_agent_command(handle, &main, plan).await?;
        }
        if !windows.iter().any(|w| w == GIT_WINDOW) {
            self.sessions.new_window(handle, &session, GIT_WINDOW, &plan.workspace_dir).await?;
            self.sessions.send_keys(handle, &format!("{}:{}", session, GIT_WINDOW), &git_banner(agent_id)).await?;
        }

        self.sessions.select_window(handle, &main).await?;
        info!(agent_id = %agent_id, session = %session, outcome = ?outcome, "Bootstrapped tmux session");
        Ok(outcome)
    }

    async fn send_agent_command(&self, handle: &ContainerHandle, target: &str, plan: &SessionPlan) -> Result<(), SessionError> {
        match plan.agent_command.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(command) => self.sessions.send_keys(handle, target, command).await,
            None => Ok(()),
        }
    }
}

fn git_banner(agent_id: &AgentId) -> String {
    format!(
        "echo 'Agent {}: git status | git log --oneline -10 | git push -u origin HEAD' && git status -sb",
        agent_id
    )
}
