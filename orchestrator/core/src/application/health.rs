// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Health Monitor
//!
//! Polls a container until it is ready: running, and `healthy` when the
//! image declares a health check. Neither a timeout nor a cancellation
//! touches the container.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::agent::ContainerHandle;
use crate::domain::errors::{OrchestratorError, Step};
use crate::domain::runtime::{ContainerInfo, ContainerRuntime};

pub struct HealthMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    poll_interval: Duration,
}

impl HealthMonitor {
    pub fn with_poll_interval(runtime: Arc<dyn ContainerRuntime>, poll_interval: Duration) -> Self {
        Self { runtime, poll_interval }
    }

    pub async fn await_ready(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<ContainerInfo, OrchestratorError> {
        self.await_ready_cancellable(handle, timeout, &CancellationToken::new()).await
    }

    /// Like [`await_ready`](Self::await_ready) but returns `Cancelled` as soon
    /// as `cancel` fires.
    pub async fn await_ready_cancellable(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ContainerInfo, OrchestratorError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let observed = self
                .runtime
                .inspect(handle.as_str())
                .await
                .map_err(|e| OrchestratorError::provisioning(Step::AwaitReady, e))?;

            let last_status = match &observed {
                Some(info) if info.is_ready() => {
                    info!(handle = %handle, elapsed_ms = started.elapsed().as_millis() as u64, "Container ready");
                    return Ok(info.clone());
                }
                Some(info) => info.status_summary(),
                None => "missing".to_string(),
            };
            debug!(handle = %handle, status = %last_status, "Container not ready yet");

            let now = Instant::now();
            if now >= deadline {
                return Err(OrchestratorError::HealthTimeout {
                    handle: handle.clone(),
                    elapsed: now - started,
                    last_status,
                });
            }

            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(OrchestratorError::Cancelled { handle: handle.clone(), elapsed: started.elapsed() });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}
