// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// tmux adapter for SessionController
//
// Every operation is one `tmux` invocation executed inside the agent
// container through ContainerRuntime::exec.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::domain::agent::ContainerHandle;
use crate::domain::runtime::ContainerRuntime;
use crate::domain::session::{SessionController, SessionError};

pub struct TmuxSessionController {
    runtime: Arc<dyn ContainerRuntime>,
}

impl TmuxSessionController {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    async fn tmux(&self, container: &ContainerHandle, args: &[&str]) -> Result<String, SessionError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("tmux".to_string());
        argv.extend(args.iter().map(|a| a.to_string()));

        debug!(container = %container, command = ?argv, "tmux");
        let output = self.runtime.exec(container.as_str(), &argv).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(SessionError::CommandFailed {
                command: argv.join(" "),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl SessionController for TmuxSessionController {
    async fn session_exists(&self, container: &ContainerHandle, session: &str) -> Result<bool, SessionError> {
        match self.tmux(container, &["has-session", "-t", session]).await {
            Ok(_) => Ok(true),
            // has-session exits 1 when the session (or the tmux server) is absent
            Err(SessionError::CommandFailed { exit_code: 1, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_windows(&self, container: &ContainerHandle, session: &str) -> Result<Vec<String>, SessionError> {
        let stdout = self.tmux(container, &["list-windows", "-t", session, "-F", "#{window_name}"]).await?;
        Ok(stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    async fn new_session(
        &self,
        container: &ContainerHandle,
        session: &str,
        window: &str,
        cwd: &str,
    ) -> Result<(), SessionError> {
        self.tmux(container, &["new-session", "-d", "-s", session, "-n", window, "-c", cwd]).await.map(drop)
    }

    async fn new_window(
        &self,
        container: &ContainerHandle,
        session: &str,
        window: &str,
        cwd: &str,
    ) -> Result<(), SessionError> {
        self.tmux(container, &["new-window", "-t", session, "-n", window, "-c", cwd]).await.map(drop)
    }

    async fn send_keys(&self, container: &ContainerHandle, target: &str, text: &str) -> Result<(), SessionError> {
        self.tmux(container, &["send-keys", "-t", target, text, "Enter"]).await.map(drop)
    }

    async fn select_window(&self, container: &ContainerHandle, target: &str) -> Result<(), SessionError> {
        self.tmux(container, &["select-window", "-t", target]).await.map(drop)
    }
}
