// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Layer
//!
//! Use cases composed from the domain capabilities:
//!
//! | Module | Component |
//! |--------|-----------|
//! | [`config_resolver`] | Configuration Resolver |
//! | [`provisioner`] | Container Provisioner |
//! | [`session_bootstrap`] | Session Bootstrapper |
//! | [`health`] | Health Monitor |
//! | [`lifecycle`] | Lifecycle Orchestrator |
//! | [`repository_factory`] | Registry construction |

pub mod config_resolver;
pub mod health;
pub mod lifecycle;
pub mod provisioner;
pub mod repository_factory;
pub mod session_bootstrap;

pub use config_resolver::{ConfigOverrides, ConfigurationResolver, ResolvedConfiguration};
pub use health::HealthMonitor;
pub use lifecycle::{CreateOptions, LifecycleOrchestrator};
pub use provisioner::ContainerProvisioner;
pub use session_bootstrap::SessionBootstrapper;
