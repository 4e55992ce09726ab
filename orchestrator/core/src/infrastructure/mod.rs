// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_bus;
pub mod in_memory_runtime;
pub mod legacy_import;
pub mod project_detector;
pub mod repositories;
pub mod runtime;
pub mod session;

pub use event_bus::EventBus;
pub use in_memory_runtime::InMemoryContainerRuntime;
pub use repositories::sqlite::SqliteRegistry;
pub use repositories::InMemoryRegistry;
pub use runtime::DockerRuntime;
pub use session::TmuxSessionController;
