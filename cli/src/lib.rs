// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! magents CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** clap commands and the in-process wiring of the orchestrator

pub mod commands;
pub mod embedded;

use std::path::PathBuf;

/// Flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub config_path: Option<PathBuf>,
    pub json: bool,
}
