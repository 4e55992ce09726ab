// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Configuration Resolver
//!
//! Produces the immutable [`ResolvedConfiguration`] used to provision one
//! agent. Layers, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. global manifest ([`MagentsConfig`])
//! 3. project settings (`<project>/.magents.yaml`, the project record's
//!    `max_agents` and detected type)
//! 4. per-call [`ConfigOverrides`]
//!
//! Credentials come from the process environment, limited to
//! [`SECRET_ALLOW_LIST`], and are never serialized or printed.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Deterministic configuration merge

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::config::MagentsConfig;
use crate::domain::errors::OrchestratorError;
use crate::domain::project::{Project, ProjectType};
use crate::domain::runtime::ResourceLimits;

/// Environment variables forwarded into agent containers.
pub const SECRET_ALLOW_LIST: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "PERPLEXITY_API_KEY",
    "GOOGLE_API_KEY",
    "MISTRAL_API_KEY",
];

pub const PROJECT_SETTINGS_FILE: &str = ".magents.yaml";

/// Variables the provisioner sets itself; callers cannot override them.
const RESERVED_ENV: &[&str] = &["AGENT_ID", "AGENT_BRANCH", "CLAUDE_BRIDGE_SOCKET"];

pub trait SecretSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the current process environment.
pub struct ProcessEnv;

impl SecretSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// Credential values, redacted in `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets(BTreeMap<String, String>);

impl Secrets {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Optional `<project>/.magents.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub max_agents: Option<u32>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cpu_millis: Option<u32>,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub agent_command: Option<String>,
}

impl ProjectSettings {
    /// Missing file means no project settings.
    pub fn load(project_root: &Path) -> Result<Self, OrchestratorError> {
        let path = project_root.join(PROJECT_SETTINGS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_yaml::from_str(&content).map_err(|e| {
                OrchestratorError::InvalidRequest(format!("invalid project settings {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(OrchestratorError::InvalidRequest(format!(
                "cannot read project settings {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Per-call overrides (highest precedence).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cpu_millis: Option<u32>,
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub agent_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfiguration {
    pub handle_prefix: String,
    pub max_agents_global: u32,
    pub max_agents_project: u32,
    /// Explicit image; bypasses the auth-volume probe.
    pub image_override: Option<String>,
    pub default_image: String,
    pub auth_volume: String,
    pub auth_image: String,
    pub auth_home: String,
    /// Host path of the bridge socket to look for; `None` disables it.
    pub bridge_socket: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    #[serde(skip)]
    pub secrets: Secrets,
    pub limits: ResourceLimits,
    pub agent_command: Option<String>,
    pub workspace_dir: String,
    pub state_dir: PathBuf,
    pub stop_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub project_type: Option<ProjectType>,
}

impl ResolvedConfiguration {
    /// Stable serialized form; equal inputs give equal bytes.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Host directory mounted at `/shared` in every agent.
    pub fn shared_config_dir(&self) -> PathBuf {
        self.state_dir.join("shared-config")
    }

    /// Host directory mounted at `/agent` for one agent.
    pub fn agent_state_dir(&self, agent_id: &str) -> PathBuf {
        self.state_dir.join("agents").join(agent_id)
    }
}

#[derive(Clone)]
pub struct ConfigurationResolver {
    global: Arc<MagentsConfig>,
    secrets: Arc<dyn SecretSource>,
}

impl ConfigurationResolver {
    pub fn new(global: Arc<MagentsConfig>, secrets: Arc<dyn SecretSource>) -> Self {
        Self { global, secrets }
    }

    pub fn global(&self) -> &MagentsConfig {
        &self.global
    }

    pub fn resolve(
        &self,
        project: &Project,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfiguration, OrchestratorError> {
        let settings = ProjectSettings::load(&project.path)?;
        self.merge(project, &settings, overrides)
    }

    /// Pure merge of the four layers.
    pub fn merge(
        &self,
        project: &Project,
        settings: &ProjectSettings,
        overrides: &ConfigOverrides,
    ) -> Result<ResolvedConfiguration, OrchestratorError> {
        let spec = &self.global.spec;

        let mut env = BTreeMap::new();
        for (key, value) in settings.env.iter().chain(overrides.env.iter()) {
            validate_env_key(key)?;
            env.insert(key.clone(), value.clone());
        }

        let secrets = Secrets(
            SECRET_ALLOW_LIST
                .iter()
                .filter_map(|key| self.secrets.get(key).map(|value| (key.to_string(), value)))
                .collect(),
        );

        if let Some(image) = overrides.image.as_deref() {
            if image.trim().is_empty() {
                return Err(OrchestratorError::InvalidRequest("image override cannot be empty".into()));
            }
        }

        let max_agents_project = settings.max_agents.unwrap_or(project.max_agents);
        if max_agents_project == 0 {
            return Err(OrchestratorError::InvalidRequest(format!(
                "project '{}' allows zero agents",
                project.id
            )));
        }

        Ok(ResolvedConfiguration {
            handle_prefix: spec.agents.handle_prefix.clone(),
            max_agents_global: spec.agents.max_agents,
            max_agents_project,
            image_override: overrides.image.clone(),
            default_image: settings.image.clone().unwrap_or_else(|| spec.runtime.default_image.clone()),
            auth_volume: spec.runtime.auth_volume.clone(),
            auth_image: spec.runtime.auth_image.clone(),
            auth_home: spec.runtime.auth_home.clone(),
            bridge_socket: spec.runtime.bridge_socket_path.as_ref().map(PathBuf::from),
            env,
            secrets,
            limits: ResourceLimits {
                cpu_millis: overrides.cpu_millis.or(settings.cpu_millis).or(spec.runtime.cpu_millis),
                memory_bytes: overrides.memory_bytes.or(settings.memory_bytes).or(spec.runtime.memory_bytes),
            },
            agent_command: overrides
                .agent_command
                .clone()
                .or_else(|| settings.agent_command.clone())
                .or_else(|| spec.session.agent_command.clone())
                .filter(|c| !c.trim().is_empty()),
            workspace_dir: spec.session.workspace_dir.clone(),
            state_dir: self.global.state_dir(),
            stop_timeout_secs: spec.runtime.stop_timeout_secs,
            health_timeout_secs: spec.health.timeout_secs,
            poll_interval_ms: spec.health.poll_interval_ms,
            project_type: project.project_type.clone(),
        })
    }
}

fn validate_env_key(key: &str) -> Result<(), OrchestratorError> {
    let valid = key
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(OrchestratorError::InvalidRequest(format!("invalid environment variable name '{}'", key)));
    }
    if RESERVED_ENV.contains(&key) || SECRET_ALLOW_LIST.contains(&key) {
        return Err(OrchestratorError::InvalidRequest(format!(
            "environment variable '{}' is managed by magents",
            key
        )));
    }
    Ok(())
}
