// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::sqlite::SqlitePool` in a thin `Database` newtype that is
//! injected into [`SqliteRegistry`](crate::infrastructure::repositories::sqlite::SqliteRegistry).
//!
//! The file is opened in WAL mode with a busy timeout so several `magents`
//! processes can share one registry. The schema is created on connect.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        path            TEXT NOT NULL UNIQUE,
        status          TEXT NOT NULL,
        max_agents      INTEGER NOT NULL,
        project_type    TEXT,
        agent_ids       TEXT NOT NULL DEFAULT '[]',
        version         INTEGER,
        schema_version  INTEGER NOT NULL DEFAULT 2,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id              TEXT PRIMARY KEY,
        project_id      TEXT,
        branch          TEXT,
        workspace_path  TEXT,
        handle          TEXT,
        status          TEXT NOT NULL,
        schema_version  INTEGER NOT NULL DEFAULT 2,
        created_at      TEXT,
        updated_at      TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agents_project_id ON agents(project_id)",
];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create registry directory {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open registry at {:?}", path))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply registry schema")?;
        }
        Ok(())
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }
}
