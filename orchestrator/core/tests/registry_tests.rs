// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry contract tests, run against both backends, plus SQLite-specific
//! checks for schema migration on read.

use std::path::PathBuf;
use std::sync::Arc;

use magents_core::domain::agent::{Agent, AgentId, AgentStatus, ContainerHandle};
use magents_core::domain::project::{Project, ProjectId};
use magents_core::domain::repository::{AgentRepository, ProjectRepository, Registry, RepositoryError};
use magents_core::infrastructure::db::Database;
use magents_core::infrastructure::repositories::sqlite::SqliteRegistry;
use magents_core::infrastructure::repositories::InMemoryRegistry;
use sqlx::Row;
use tempfile::TempDir;

async fn sqlite() -> (SqliteRegistry, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("magents.db")).await.unwrap();
    (SqliteRegistry::new(db, "magents"), dir)
}

fn project(path: &str) -> Project {
    Project::new(PathBuf::from(path), 5)
}

fn agent(id: &str, project: &Project) -> Agent {
    let id = AgentId::parse(id).unwrap();
    Agent::new(
        id.clone(),
        "main",
        project.id.clone(),
        project.path.clone(),
        ContainerHandle::for_agent("magents", &id),
        AgentStatus::Running,
    )
}

async fn exercise_contract(registry: Arc<dyn Registry>) {
    let shop = project("/repos/shop");
    registry.create_project(&shop).await.unwrap();
    assert!(matches!(registry.create_project(&shop).await, Err(RepositoryError::AlreadyExists(_))));

    let found = registry.find_project_by_path(&PathBuf::from("/repos/shop")).await.unwrap().unwrap();
    assert_eq!(found.id, shop.id);
    assert!(registry.find_project_by_path(&PathBuf::from("/repos/other")).await.unwrap().is_none());

    // Version compare-and-swap
    let mut first = found.clone();
    first.attach_agent(AgentId::parse("a").unwrap());
    let stored = registry.update_project(&first).await.unwrap();
    assert_eq!(stored.version, found.version + 1);

    let mut stale = found.clone();
    stale.attach_agent(AgentId::parse("b").unwrap());
    assert!(matches!(registry.update_project(&stale).await, Err(RepositoryError::Conflict(_))));

    let mut missing = project("/repos/nowhere");
    missing.id = ProjectId::from_raw("nowhere-000000000000");
    assert!(matches!(registry.update_project(&missing).await, Err(RepositoryError::NotFound(_))));

    // Agents
    let a = agent("a", &shop);
    registry.create_agent(&a).await.unwrap();
    assert!(matches!(registry.create_agent(&a).await, Err(RepositoryError::AlreadyExists(_))));

    let stopped = registry.update_agent_status(&a.id, AgentStatus::Running, AgentStatus::Stopped).await.unwrap();
    assert_eq!(stopped.status, AgentStatus::Stopped);
    assert!(matches!(
        registry.update_agent_status(&a.id, AgentStatus::Running, AgentStatus::Error).await,
        Err(RepositoryError::Conflict(_))
    ));

    let listed = registry.list_agents().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].handle.as_str(), "magents-a");

    registry.remove_agent(&a.id).await.unwrap();
    assert!(registry.find_agent(&a.id).await.unwrap().is_none());
    assert!(matches!(registry.remove_agent(&a.id).await, Err(RepositoryError::NotFound(_))));

    assert_eq!(registry.list_projects().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_in_memory_contract() {
    exercise_contract(Arc::new(InMemoryRegistry::new())).await;
}

#[tokio::test]
async fn test_sqlite_contract() {
    let (registry, _dir) = sqlite().await;
    exercise_contract(Arc::new(registry)).await;
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("magents.db");
    let shop = project("/repos/shop");
    {
        let registry = SqliteRegistry::new(Database::open(&path).await.unwrap(), "magents");
        registry.create_project(&shop).await.unwrap();
        registry.create_agent(&agent("demo-1", &shop)).await.unwrap();
    }

    let registry = SqliteRegistry::new(Database::open(&path).await.unwrap(), "magents");
    let stored = registry.find_agent(&AgentId::parse("demo-1").unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.project_id, shop.id);
    assert_eq!(stored.status, AgentStatus::Running);
}

#[tokio::test]
async fn test_version_check_holds_across_separate_pools() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("magents.db");
    // Two pools on one file stand in for two magents processes
    let left = SqliteRegistry::new(Database::open(&path).await.unwrap(), "magents");
    let right = SqliteRegistry::new(Database::open(&path).await.unwrap(), "magents");

    let shop = project("/repos/shop");
    left.create_project(&shop).await.unwrap();
    let seen_left = left.find_project_by_id(&shop.id).await.unwrap().unwrap();
    let seen_right = right.find_project_by_id(&shop.id).await.unwrap().unwrap();
    assert_eq!(seen_left.version, seen_right.version);

    let mut from_left = seen_left.clone();
    from_left.attach_agent(AgentId::parse("a").unwrap());
    let mut from_right = seen_right.clone();
    from_right.attach_agent(AgentId::parse("b").unwrap());

    let (l, r) = tokio::join!(left.update_project(&from_left), right.update_project(&from_right));
    let (winner, loser) = match (l, r) {
        (Ok(stored), Err(e)) => (stored, e),
        (Err(e), Ok(stored)) => (stored, e),
        other => panic!("expected exactly one update to win, got {:?}", other),
    };
    assert!(matches!(loser, RepositoryError::Conflict(_)));
    assert_eq!(winner.version, shop.version + 1);

    // The loser re-reads and retries, as membership updates do
    let retry_from = if winner.owns(&AgentId::parse("a").unwrap()) { &right } else { &left };
    let mut fresh = retry_from.find_project_by_id(&shop.id).await.unwrap().unwrap();
    assert_eq!(fresh.version, winner.version);
    let missing = if winner.owns(&AgentId::parse("a").unwrap()) { "b" } else { "a" };
    fresh.attach_agent(AgentId::parse(missing).unwrap());
    retry_from.update_project(&fresh).await.unwrap();

    let stored = left.find_project_by_id(&shop.id).await.unwrap().unwrap();
    assert_eq!(stored.version, shop.version + 2);
    assert_eq!(stored.agent_ids.len(), 2);
}

#[tokio::test]
async fn test_v1_agent_row_is_migrated_on_read_and_rewritten_on_update() {
    let (registry, _dir) = sqlite().await;
    sqlx::query(
        "INSERT INTO agents (id, branch, workspace_path, status, schema_version) VALUES (?, ?, ?, ?, 1)",
    )
    .bind("legacy-1")
    .bind("feature/old")
    .bind("/repos/shop/")
    .bind("running")
    .execute(registry.pool())
    .await
    .unwrap();

    let id = AgentId::parse("legacy-1").unwrap();
    let agent = registry.find_agent(&id).await.unwrap().unwrap();
    assert_eq!(agent.handle.as_str(), "magents-legacy-1");
    assert_eq!(agent.status, AgentStatus::Running);
    assert_eq!(agent.workspace_path, PathBuf::from("/repos/shop"));
    assert_eq!(agent.project_id, project("/repos/shop").id);

    registry.update_agent_status(&id, AgentStatus::Running, AgentStatus::Stopped).await.unwrap();

    let row = sqlx::query("SELECT schema_version, handle, project_id, status FROM agents WHERE id = ?")
        .bind("legacy-1")
        .fetch_one(registry.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("schema_version"), 2);
    assert_eq!(row.get::<String, _>("handle"), "magents-legacy-1");
    assert_eq!(row.get::<String, _>("status"), "STOPPED");
    assert_eq!(row.get::<String, _>("project_id"), project("/repos/shop").id.to_string());
}

#[tokio::test]
async fn test_v1_project_row_reads_as_version_one() {
    let (registry, _dir) = sqlite().await;
    sqlx::query(
        r#"
        INSERT INTO projects (id, name, path, status, max_agents, project_type, agent_ids, version, schema_version, created_at, updated_at)
        VALUES ('shop-legacy', 'shop', '/repos/shop', 'active', 3, 'node', '["a"]', NULL, 1,
                '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')
        "#,
    )
    .execute(registry.pool())
    .await
    .unwrap();

    let mut stored = registry.find_project_by_id(&ProjectId::from_raw("shop-legacy")).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.max_agents, 3);
    assert!(stored.project_type.is_none());
    assert_eq!(stored.agent_ids, vec![AgentId::parse("a").unwrap()]);

    stored.attach_agent(AgentId::parse("b").unwrap());
    let updated = registry.update_project(&stored).await.unwrap();
    assert_eq!(updated.version, 2);
}

#[tokio::test]
async fn test_unreadable_rows_are_skipped_in_listings() {
    let (registry, _dir) = sqlite().await;
    let shop = project("/repos/shop");
    registry.create_project(&shop).await.unwrap();
    registry.create_agent(&agent("good", &shop)).await.unwrap();
    sqlx::query("INSERT INTO agents (id, status, schema_version) VALUES ('no-path', 'RUNNING', 1)")
        .execute(registry.pool())
        .await
        .unwrap();

    let agents = registry.list_agents().await.unwrap();
    assert_eq!(agents.len(), 1);
    assert!(matches!(
        registry.find_agent(&AgentId::parse("no-path").unwrap()).await,
        Err(RepositoryError::Migration(_))
    ));
}
