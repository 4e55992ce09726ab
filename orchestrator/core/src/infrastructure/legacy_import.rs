// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Legacy registry reader
//
// The Docker-era manager kept its agents in `~/.magents/docker_agents.json`,
// a JSON array of camelCase records. They are read here as v1 records and
// committed by `LifecycleOrchestrator::import_legacy`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::record::{AgentRecord, LegacyAgentEntry};

pub const LEGACY_FILE_NAME: &str = "docker_agents.json";

/// `<state_dir>/docker_agents.json`
pub fn default_legacy_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LEGACY_FILE_NAME)
}

pub fn parse_legacy_registry(json: &str) -> Result<Vec<AgentRecord>> {
    let entries: Vec<LegacyAgentEntry> =
        serde_json::from_str(json).context("Legacy registry is not a JSON array of agent records")?;
    Ok(entries.into_iter().map(AgentRecord::from_legacy).collect())
}

pub fn read_legacy_registry(path: &Path) -> Result<Vec<AgentRecord>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read legacy registry {:?}", path))?;
    parse_legacy_registry(&content)
}
