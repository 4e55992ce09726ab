// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Entities, value objects and the ports implemented by infrastructure.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent and project model, registry and runtime contracts

pub mod agent;
pub mod config;
pub mod errors;
pub mod events;
pub mod project;
pub mod record;
pub mod repository;
pub mod runtime;
pub mod session;
