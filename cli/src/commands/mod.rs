// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the magents CLI

pub mod agent;
pub mod config;
pub mod project;
pub mod serve;

pub use self::agent::AgentCommand;
pub use self::config::ConfigCommand;
pub use self::project::ProjectCommand;
pub use self::serve::ServeArgs;

use anyhow::Result;
use serde::Serialize;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
