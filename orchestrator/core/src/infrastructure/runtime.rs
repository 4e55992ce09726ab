// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::runtime::{
    labels, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, HealthState, MountKind,
    RuntimeError,
};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, HealthStatusEnum, HostConfig, Mount, MountTypeEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

/// Docker Engine adapter. All calls address containers by name.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(socket_path: Option<String>) -> Result<Self, RuntimeError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                RuntimeError::Unreachable(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Unreachable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - On Linux: Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Unreachable(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }
}

fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Server responses are rejections (or not-found); anything else means the
/// daemon could not be reached.
fn map_error(name: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, message } => {
            RuntimeError::NotFound(format!("{}: {}", name, message))
        }
        bollard::errors::Error::DockerResponseServerError { status_code, message } => {
            RuntimeError::Rejected(format!("{} ({}): {}", name, status_code, message))
        }
        other => RuntimeError::Unreachable(other.to_string()),
    }
}

fn container_state(status: Option<ContainerStateStatusEnum>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        Some(other) => ContainerState::Unknown(other.to_string()),
        None => ContainerState::Unknown("missing".to_string()),
    }
}

fn health_state(status: Option<HealthStatusEnum>) -> Option<HealthState> {
    match status {
        Some(HealthStatusEnum::STARTING) => Some(HealthState::Starting),
        Some(HealthStatusEnum::HEALTHY) => Some(HealthState::Healthy),
        Some(HealthStatusEnum::UNHEALTHY) => Some(HealthState::Unhealthy),
        _ => None,
    }
}

fn to_docker_mount(mount: &crate::domain::runtime::Mount) -> Mount {
    Mount {
        target: Some(mount.target.clone()),
        source: Some(mount.source.clone()),
        typ: Some(match mount.kind {
            MountKind::Bind => MountTypeEnum::BIND,
            MountKind::Volume => MountTypeEnum::VOLUME,
        }),
        read_only: Some(mount.read_only),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let mut host_config = HostConfig {
            mounts: Some(spec.mounts.iter().map(to_docker_mount).collect()),
            ..Default::default()
        };

        // Apply resource limits if specified
        if let Some(memory_bytes) = spec.limits.memory_bytes {
            host_config.memory = Some(memory_bytes as i64);
        }
        if let Some(cpu_millis) = spec.limits.cpu_millis {
            // Docker nano_cpus: 1 CPU = 1e9 nano CPUs, 1 milli CPU = 1e6 nano CPUs
            host_config.nano_cpus = Some((cpu_millis as i64) * 1_000_000);
        }

        // Convert map to "KEY=VALUE" strings
        let env_vars: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let labels: HashMap<String, String> = spec.labels.clone().into_iter().collect();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            entrypoint: spec.entrypoint.clone(),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: Some(env_vars),
            labels: Some(labels),
            working_dir: spec.working_dir.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: Some(spec.name.clone()), ..Default::default() };

        self.docker.create_container(Some(options), body).await.map_err(|e| map_error(&spec.name, e))?;

        info!(container = %spec.name, image = %spec.image, "Created agent container");
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self.docker.start_container(name, None::<StartContainerOptions>).await {
            Ok(()) => {}
            // 304: already started
            Err(e) if status_code(&e) == Some(304) => {}
            Err(e) => return Err(map_error(name, e)),
        }
        info!(container = %name, "Started agent container");
        Ok(())
    }

    async fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: Some(timeout.as_secs().min(i32::MAX as u64) as i32),
            ..Default::default()
        };

        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => {
                info!(container = %name, "Stopped agent container");
                Ok(())
            }
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => {
                debug!(container = %name, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(map_error(name, e)),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions { force: true, ..Default::default() };

        self.docker.remove_container(name, Some(options)).await.map_err(|e| map_error(name, e))?;

        info!(container = %name, "Removed agent container");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let inspect = match self.docker.inspect_container(name, None::<InspectContainerOptions>).await {
            Ok(inspect) => inspect,
            Err(e) if status_code(&e) == Some(404) => return Ok(None),
            Err(e) => return Err(map_error(name, e)),
        };

        let (state, health) = match inspect.state {
            Some(state) => (
                container_state(state.status),
                health_state(state.health.and_then(|h| h.status)),
            ),
            None => (ContainerState::Unknown("missing".to_string()), None),
        };

        let (labels, image) = match inspect.config {
            Some(config) => (config.labels.unwrap_or_default().into_iter().collect::<BTreeMap<_, _>>(), config.image),
            None => (BTreeMap::new(), None),
        };

        let name = inspect
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| name.to_string());

        Ok(Some(ContainerInfo { name, state, health, labels, image }))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(map_error(name, e)),
        }
    }

    async fn list_managed(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", labels::MANAGED)]);

        let options = ListContainersOptions { all: true, filters: Some(filters), ..Default::default() };

        let summaries = self.docker.list_containers(Some(options)).await.map_err(|e| map_error("list", e))?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(name) = summary
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
            else {
                continue;
            };
            // A container can disappear between list and inspect
            if let Some(info) = self.inspect(&name).await? {
                containers.push(info);
            }
        }
        Ok(containers)
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(argv.to_vec()),
            ..Default::default()
        };

        let exec = self.docker.create_exec(name, exec_config).await.map_err(|e| map_error(name, e))?;

        let res = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::ExecFailed(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = res {
            while let Some(msg) = output.next().await {
                match msg {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(_) => {}
                    Err(e) => return Err(RuntimeError::ExecFailed(e.to_string())),
                }
            }
        }

        // Get exit code from exec
        let exec_inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::ExecFailed(format!("Failed to inspect exec: {}", e)))?;

        Ok(ExecOutput {
            exit_code: exec_inspect.exit_code.unwrap_or(0),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }
}
