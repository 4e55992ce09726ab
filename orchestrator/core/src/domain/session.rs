// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-container terminal multiplexer capability.
//!
//! The only concrete adapter drives tmux through `ContainerRuntime::exec`
//! (`crate::infrastructure::session`). Targets use tmux notation
//! (`session:window`).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::agent::ContainerHandle;
use crate::domain::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("`{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },
}

#[async_trait]
pub trait SessionController: Send + Sync {
    async fn session_exists(&self, container: &ContainerHandle, session: &str) -> Result<bool, SessionError>;

    /// Window names of an existing session, in index order.
    async fn list_windows(&self, container: &ContainerHandle, session: &str) -> Result<Vec<String>, SessionError>;

    /// Create a detached session whose first window is `window`.
    async fn new_session(
        &self,
        container: &ContainerHandle,
        session: &str,
        window: &str,
        cwd: &str,
    ) -> Result<(), SessionError>;

    async fn new_window(
        &self,
        container: &ContainerHandle,
        session: &str,
        window: &str,
        cwd: &str,
    ) -> Result<(), SessionError>;

    /// Type `text` into `target` followed by Enter.
    async fn send_keys(&self, container: &ContainerHandle, target: &str, text: &str) -> Result<(), SessionError>;

    async fn select_window(&self, container: &ContainerHandle, target: &str) -> Result<(), SessionError>;
}
