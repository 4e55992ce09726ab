// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Project Aggregate
//!
//! A project owns a set of agents and is keyed by a normalized filesystem
//! path. Its id is derived from that path, so re-detecting the same
//! directory always yields the same record.
//!
//! `agent_ids` is the authoritative membership list. The `version` counter
//! backs compare-and-swap updates in the registry.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Project identity, path normalization and membership

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// `<slug(name)>-<first 12 hex chars of sha256(normalized path)>`
    pub fn derive(name: &str, normalized_path: &Path) -> Self {
        let digest = Sha256::digest(normalized_path.to_string_lossy().as_bytes());
        let hash = hex::encode(digest);
        Self(format!("{}-{}", slugify(name), &hash[..12]))
    }

    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Active,
    Inactive,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(ProjectStatus::Active),
            "INACTIVE" => Some(ProjectStatus::Inactive),
            _ => None,
        }
    }
}

/// Detected language, package manager and frameworks of a project root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectType {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frameworks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub path: PathBuf,
    pub status: ProjectStatus,
    pub max_agents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<ProjectType>,
    #[serde(default)]
    pub agent_ids: Vec<AgentId>,
    /// Incremented by the registry on every successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Build a new, not yet persisted project for an already normalized path.
    pub fn new(normalized_path: PathBuf, max_agents: u32) -> Self {
        let name = project_name_for(&normalized_path);
        let now = Utc::now();
        Self {
            id: ProjectId::derive(&name, &normalized_path),
            name,
            path: normalized_path,
            status: ProjectStatus::Active,
            max_agents,
            project_type: None,
            agent_ids: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn owns(&self, agent_id: &AgentId) -> bool {
        self.agent_ids.contains(agent_id)
    }

    /// Append an agent id; returns false if it was already listed.
    pub fn attach_agent(&mut self, agent_id: AgentId) -> bool {
        if self.owns(&agent_id) {
            return false;
        }
        self.agent_ids.push(agent_id);
        self.updated_at = Utc::now();
        true
    }

    /// Drop an agent id; returns false if it was not listed.
    pub fn detach_agent(&mut self, agent_id: &AgentId) -> bool {
        let before = self.agent_ids.len();
        self.agent_ids.retain(|id| id != agent_id);
        let changed = self.agent_ids.len() != before;
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

/// Lowercase, dash-separated form of a project name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Final path component, or `root` for `/`.
pub fn project_name_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}

/// Resolve a project path to its canonical absolute form.
///
/// Existing paths are canonicalized (symlinks resolved); missing ones are
/// made absolute and cleaned lexically.
pub fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(_) => Ok(normalize_lexically(&std::path::absolute(path)?)),
    }
}

/// Remove `.` segments, fold `..` and drop trailing separators without
/// touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
