// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete registry for the configured storage backend, keeping
//! the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Registry construction from configuration

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::config::{MagentsConfig, RegistryBackend};
use crate::domain::repository::{Registry, SqliteConfig, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::sqlite::SqliteRegistry;
use crate::infrastructure::repositories::InMemoryRegistry;

/// Storage backend selected by `spec.registry`.
pub fn storage_backend(config: &MagentsConfig) -> StorageBackend {
    match config.spec.registry.backend {
        RegistryBackend::Memory => StorageBackend::InMemory,
        RegistryBackend::Sqlite => StorageBackend::Sqlite(SqliteConfig { database_path: config.database_path() }),
    }
}

/// Creates a Registry implementation based on the configured backend
pub async fn create_registry(backend: &StorageBackend, handle_prefix: &str) -> Result<Arc<dyn Registry>> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory registry; records are lost on exit");
            Ok(Arc::new(InMemoryRegistry::new()))
        }
        StorageBackend::Sqlite(sqlite) => {
            let db = Database::open(&sqlite.database_path)
                .await
                .with_context(|| format!("Failed to open registry at {:?}", sqlite.database_path))?;
            info!(path = %sqlite.database_path.display(), "Opened SQLite registry");
            Ok(Arc::new(SqliteRegistry::new(db, handle_prefix)))
        }
    }
}
