// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # magents core
//!
//! Agent lifecycle orchestration: one container per agent, bound to a
//! branch and owned by a project, with a tmux session bootstrapped inside.
//!
//! # Architecture
//!
//! | Layer | Contents |
//! |-------|----------|
//! | [`domain`] | Agent and project aggregates, versioned records, capability traits, errors, events, configuration schema |
//! | [`application`] | Configuration resolver, provisioner, health monitor, session bootstrapper, lifecycle orchestrator |
//! | [`infrastructure`] | SQLite and in-memory registries, bollard Docker runtime, tmux-over-exec sessions, event bus |
//! | [`presentation`] | Axum HTTP API |

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use application::lifecycle::{CreateOptions, LifecycleOrchestrator};
pub use domain::errors::OrchestratorError;
