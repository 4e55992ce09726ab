// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Global configuration manifest
//
// Kubernetes-style YAML manifest (apiVersion/kind/metadata/spec) holding the
// operator-wide settings:
// - agent limits and naming
// - container runtime and image selection
// - tmux session bootstrap
// - readiness polling
// - registry location
// - logging and HTTP API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "magents.dev/v1";
pub const KIND: &str = "MagentsConfig";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MAGENTS_CONFIG_PATH";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagentsConfig {
    /// API version (must be "magents.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "MagentsConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSpec {
    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Live agents allowed across all projects
    #[serde(default = "default_max_agents")]
    pub max_agents: u32,

    /// Limit given to auto-created projects
    #[serde(default = "default_project_max_agents")]
    pub project_max_agents: u32,

    /// Prefix of container and session names ("<prefix>-<agent id>")
    #[serde(default = "default_handle_prefix")]
    pub handle_prefix: String,

    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Per-agent state and shared config live here (default: ~/.magents)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            project_max_agents: default_project_max_agents(),
            handle_prefix: default_handle_prefix(),
            default_branch: default_branch(),
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to Docker socket
    /// Default: platform auto-detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,

    #[serde(default = "default_image")]
    pub default_image: String,

    /// When this volume exists the auth-enabled image is used and the
    /// volume is mounted at `auth_home`.
    #[serde(default = "default_auth_volume")]
    pub auth_volume: String,

    #[serde(default = "default_auth_image")]
    pub auth_image: String,

    #[serde(default = "default_auth_home")]
    pub auth_home: String,

    /// Host socket of the Claude bridge, mounted into containers when it
    /// exists. `null` disables the lookup.
    #[serde(default = "default_bridge_socket")]
    pub bridge_socket_path: Option<String>,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket_path: None,
            default_image: default_image(),
            auth_volume: default_auth_volume(),
            auth_image: default_auth_image(),
            auth_home: default_auth_home(),
            bridge_socket_path: default_bridge_socket(),
            stop_timeout_secs: default_stop_timeout(),
            cpu_millis: None,
            memory_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Typed into the primary window after the session is created
    #[serde(default = "default_agent_command")]
    pub agent_command: Option<String>,

    /// Working directory of every window (the workspace mount)
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { agent_command: default_agent_command(), workspace_dir: default_workspace_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { timeout_secs: default_health_timeout(), poll_interval_ms: default_poll_interval() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,

    /// SQLite file (default: <state_dir>/magents.db)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_api_port() }
    }
}

// Default value functions
fn default_max_agents() -> u32 {
    5
}

fn default_project_max_agents() -> u32 {
    5
}

fn default_handle_prefix() -> String {
    crate::domain::agent::DEFAULT_HANDLE_PREFIX.to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_image() -> String {
    "magents/agent:latest".to_string()
}

fn default_auth_volume() -> String {
    "claude-container-auth".to_string()
}

fn default_auth_image() -> String {
    "magents/claude:dev".to_string()
}

fn default_auth_home() -> String {
    "/home/magents".to_string()
}

fn default_bridge_socket() -> Option<String> {
    Some("/tmp/claude-bridge-persistent/claude-bridge.sock".to_string())
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_agent_command() -> Option<String> {
    Some("claude --dangerously-skip-permissions".to_string())
}

fn default_workspace_dir() -> String {
    "/workspace".to_string()
}

fn default_health_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    7420
}

impl Default for MagentsConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata { name: "default".to_string(), labels: None },
            spec: ConfigSpec::default(),
        }
    }
}

impl MagentsConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate config files in precedence order
    /// 1. MAGENTS_CONFIG_PATH environment variable
    /// 2. ./magents-config.yaml (working directory)
    /// 3. ~/.magents/config.yaml (user home)
    /// 4. /etc/magents/config.yaml (system)
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./magents-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".magents").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/magents/config.yaml"));
        paths
    }

    /// First existing file among [`Self::search_paths`]
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", config_path, e))?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Self::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("MAGENTS_MAX_AGENTS") {
            match val.parse::<u32>() {
                Ok(max) => {
                    tracing::info!("Environment override: MAGENTS_MAX_AGENTS={}", max);
                    self.spec.agents.max_agents = max;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for MAGENTS_MAX_AGENTS: '{}'. Expected a number. Ignoring.", val);
                }
            }
        }

        if let Some(image) = lookup("MAGENTS_DOCKER_IMAGE").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: MAGENTS_DOCKER_IMAGE={}", image);
            self.spec.runtime.default_image = image;
        }

        if let Some(socket) = lookup("MAGENTS_DOCKER_SOCKET").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: MAGENTS_DOCKER_SOCKET={}", socket);
            self.spec.runtime.docker_socket_path = Some(socket);
        }

        if let Some(db) = lookup("MAGENTS_DB_PATH").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: MAGENTS_DB_PATH={}", db);
            self.spec.registry.database_path = Some(PathBuf::from(db));
        }

        if let Some(dir) = lookup("MAGENTS_STATE_DIR").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: MAGENTS_STATE_DIR={}", dir);
            self.spec.agents.state_dir = Some(PathBuf::from(dir));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let agents = &self.spec.agents;
        if agents.max_agents == 0 {
            anyhow::bail!("spec.agents.max_agents must be at least 1");
        }
        if agents.project_max_agents == 0 {
            anyhow::bail!("spec.agents.project_max_agents must be at least 1");
        }
        if crate::domain::agent::AgentId::parse(&agents.handle_prefix).is_err() {
            anyhow::bail!(
                "spec.agents.handle_prefix '{}' is not a valid container name prefix",
                agents.handle_prefix
            );
        }

        if self.spec.runtime.default_image.is_empty() {
            anyhow::bail!("spec.runtime.default_image cannot be empty");
        }

        if !self.spec.session.workspace_dir.starts_with('/') {
            anyhow::bail!("spec.session.workspace_dir must be an absolute path");
        }

        let health = &self.spec.health;
        if health.timeout_secs == 0 || health.poll_interval_ms == 0 {
            anyhow::bail!("spec.health timeout and poll interval must be positive");
        }
        if health.poll_interval_ms >= health.timeout_secs * 1000 {
            anyhow::bail!(
                "spec.health.poll_interval_ms ({}) must be shorter than timeout_secs ({}s)",
                health.poll_interval_ms,
                health.timeout_secs
            );
        }

        if !matches!(self.spec.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("spec.logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Root of per-agent state and shared config.
    pub fn state_dir(&self) -> PathBuf {
        self.spec
            .agents
            .state_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".magents")))
            .unwrap_or_else(|| PathBuf::from(".magents"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.spec
            .registry
            .database_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("magents.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = MagentsConfig::default();
        assert_eq!(config.api_version, API_VERSION);
        assert_eq!(config.kind, KIND);
        assert_eq!(config.spec.agents.max_agents, 5);
        assert_eq!(config.spec.agents.handle_prefix, "magents");
        assert_eq!(config.spec.runtime.default_image, "magents/agent:latest");
        assert_eq!(config.spec.health.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: magents.dev/v1
kind: MagentsConfig
metadata:
  name: laptop
spec:
  agents:
    max_agents: 3
  runtime:
    default_image: ghcr.io/acme/agent:1.2
"#;
        let config = MagentsConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.spec.agents.max_agents, 3);
        assert_eq!(config.spec.agents.project_max_agents, 5);
        assert_eq!(config.spec.runtime.default_image, "ghcr.io/acme/agent:1.2");
        assert_eq!(config.spec.runtime.auth_volume, "claude-container-auth");
        assert_eq!(
            config.spec.runtime.bridge_socket_path.as_deref(),
            Some("/tmp/claude-bridge-persistent/claude-bridge.sock")
        );
        assert_eq!(config.spec.health.poll_interval_ms, 1000);
        assert_eq!(config.spec.registry.backend, RegistryBackend::Sqlite);
    }

    #[test]
    fn test_validation() {
        let mut config = MagentsConfig::default();

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.spec.agents.max_agents = 0;
        assert!(config.validate().is_err());
        config.spec.agents.max_agents = 5;

        config.spec.agents.handle_prefix = "-bad".to_string();
        assert!(config.validate().is_err());
        config.spec.agents.handle_prefix = "magents".to_string();

        config.spec.health.poll_interval_ms = 30_000;
        assert!(config.validate().is_err());
        config.spec.health.poll_interval_ms = 1000;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MagentsConfig::default();
        let env = BTreeMap::from([
            ("MAGENTS_MAX_AGENTS", "9"),
            ("MAGENTS_DOCKER_IMAGE", "custom:dev"),
            ("MAGENTS_DB_PATH", "/tmp/reg.db"),
        ]);
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.spec.agents.max_agents, 9);
        assert_eq!(config.spec.runtime.default_image, "custom:dev");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/reg.db"));

        // Unparseable values are ignored
        config.apply_overrides_from(|k| (k == "MAGENTS_MAX_AGENTS").then(|| "many".to_string()));
        assert_eq!(config.spec.agents.max_agents, 9);
    }

    #[test]
    fn test_database_path_follows_state_dir() {
        let mut config = MagentsConfig::default();
        config.spec.agents.state_dir = Some(PathBuf::from("/var/lib/magents"));
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/magents/magents.db"));
    }
}
