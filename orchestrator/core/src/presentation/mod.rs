// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`magents-orchestrator-core`)
//!
//! HTTP surface that translates external requests into
//! [`LifecycleOrchestrator`](crate::application::lifecycle::LifecycleOrchestrator)
//! calls. No business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | REST endpoints for agents, projects and reconcile |

pub mod api;
