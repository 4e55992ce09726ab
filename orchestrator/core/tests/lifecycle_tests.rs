// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests of the lifecycle orchestrator against the in-memory
//! container runtime, the tmux-over-exec session adapter and both registry
//! backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use magents_core::application::config_resolver::ConfigurationResolver;
use magents_core::application::lifecycle::{CreateOptions, LifecycleOrchestrator, ListFilter, StopOutcome};
use magents_core::application::repository_factory::create_registry;
use magents_core::domain::agent::{AgentId, AgentStatus};
use magents_core::domain::config::MagentsConfig;
use magents_core::domain::errors::{LimitScope, OrchestratorError, RollbackOutcome, Step};
use magents_core::domain::events::AgentLifecycleEvent;
use magents_core::domain::repository::{Registry, SqliteConfig, StorageBackend};
use magents_core::domain::runtime::{labels, ContainerRuntime, ContainerState};
use magents_core::infrastructure::event_bus::EventBus;
use magents_core::infrastructure::in_memory_runtime::{FailOn, InMemoryContainerRuntime};
use magents_core::infrastructure::legacy_import::parse_legacy_registry;
use magents_core::infrastructure::repositories::InMemoryRegistry;
use magents_core::infrastructure::session::TmuxSessionController;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    orchestrator: LifecycleOrchestrator,
    runtime: InMemoryContainerRuntime,
    registry: Arc<dyn Registry>,
    repo: TempDir,
    _state: TempDir,
}

impl Harness {
    fn new(max_agents: u32, project_max_agents: u32) -> Self {
        Self::with_registry(max_agents, project_max_agents, Arc::new(InMemoryRegistry::new()))
    }

    fn with_registry(max_agents: u32, project_max_agents: u32, registry: Arc<dyn Registry>) -> Self {
        let state = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();

        let mut config = MagentsConfig::default();
        config.spec.agents.state_dir = Some(state.path().to_path_buf());
        config.spec.agents.max_agents = max_agents;
        config.spec.agents.project_max_agents = project_max_agents;
        config.spec.health.timeout_secs = 5;
        config.spec.health.poll_interval_ms = 100;

        let runtime = InMemoryContainerRuntime::new();
        let runtime_dyn: Arc<dyn ContainerRuntime> = Arc::new(runtime.clone());
        let secrets = BTreeMap::from([("ANTHROPIC_API_KEY".to_string(), "sk-test".to_string())]);
        let orchestrator = LifecycleOrchestrator::new(
            registry.clone(),
            runtime_dyn.clone(),
            Arc::new(TmuxSessionController::new(runtime_dyn)),
            ConfigurationResolver::new(Arc::new(config), Arc::new(secrets)),
            EventBus::with_default_capacity(),
        );

        Self { orchestrator, runtime, registry, repo, _state: state }
    }

    fn options(&self, id: &str, branch: &str) -> CreateOptions {
        CreateOptions {
            id: Some(id.to_string()),
            branch: branch.to_string(),
            project_path: self.repo.path().to_path_buf(),
            ..Default::default()
        }
    }

    async fn create(&self, id: &str) -> Result<(), OrchestratorError> {
        self.orchestrator.create(self.options(id, "main")).await.map(|_| ())
    }
}

fn id(raw: &str) -> AgentId {
    AgentId::parse(raw).unwrap()
}

#[tokio::test]
async fn test_demo_scenario_create_records_running_agent() {
    let h = Harness::new(5, 5);
    let mut events = h.orchestrator.events().subscribe();

    let created = h.orchestrator.create(h.options("demo-1", "feature/x")).await.unwrap();

    assert_eq!(created.agent.status, AgentStatus::Running);
    assert_eq!(created.agent.handle.as_str(), "magents-demo-1");
    assert_eq!(created.attach.session, "magents-demo-1");

    let stored = h.registry.find_agent(&id("demo-1")).await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Running);
    assert_eq!(stored.branch, "feature/x");
    assert_eq!(h.runtime.state_of("magents-demo-1"), Some(ContainerState::Running));

    // Project auto-created and listing the agent
    let project = h.registry.find_project_by_id(&stored.project_id).await.unwrap().unwrap();
    assert!(project.owns(&id("demo-1")));
    assert_eq!(created.project.agent_ids, vec![id("demo-1")]);
    let slug_and_hash: Vec<&str> = project.id.as_str().rsplitn(2, '-').collect();
    assert_eq!(slug_and_hash[0].len(), 12);

    // Container spec
    let spec = h.runtime.spec_of("magents-demo-1").unwrap();
    assert_eq!(spec.env.get("AGENT_BRANCH").map(String::as_str), Some("feature/x"));
    assert_eq!(spec.env.get("ANTHROPIC_API_KEY").map(String::as_str), Some("sk-test"));
    assert_eq!(spec.labels.get(labels::PROJECT_ID), Some(&project.id.to_string()));

    // tmux session with both windows
    assert_eq!(
        h.runtime.windows_of("magents-demo-1", "magents-demo-1"),
        vec!["main".to_string(), "git".to_string()]
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e, AgentLifecycleEvent::ProjectCreated { .. })));
    assert!(seen.iter().any(|e| matches!(e, AgentLifecycleEvent::ContainerReady { .. })));
    assert!(seen.iter().any(|e| matches!(e, AgentLifecycleEvent::SessionBootstrapped { created: true, .. })));
    assert!(seen.last().is_some_and(|e| matches!(e, AgentLifecycleEvent::AgentCreated { .. })));
}

#[tokio::test]
async fn test_generated_id_when_none_given() {
    let h = Harness::new(5, 5);
    let mut options = h.options("unused", "main");
    options.id = None;

    let created = h.orchestrator.create(options).await.unwrap();
    assert!(created.agent.id.as_str().starts_with("agent-"));
}

#[tokio::test]
async fn test_duplicate_id_fails_without_runtime_calls() {
    let h = Harness::new(5, 5);
    h.create("demo-1").await.unwrap();
    let calls = h.runtime.call_count();

    let err = h.create("demo-1").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyExists(_)));
    assert_eq!(err.failed_step(), Some(Step::Validate));
    assert_eq!(h.runtime.call_count(), calls);
}

#[tokio::test]
async fn test_invalid_requests_have_no_side_effects() {
    let h = Harness::new(5, 5);

    let err = h.orchestrator.create(h.options("bad id", "main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

    let err = h.orchestrator.create(h.options("ok", "bad..branch")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

    let mut options = h.options("ok", "main");
    options.project_path = h.repo.path().join("missing");
    let err = h.orchestrator.create(options).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);

    assert_eq!(h.runtime.call_count(), 0);
    assert!(h.registry.list_projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_project_limit_rejects_before_any_container() {
    let h = Harness::new(10, 2);
    h.create("a").await.unwrap();
    h.create("b").await.unwrap();
    let containers = h.runtime.container_names();

    let err = h.create("c").await.unwrap_err();
    match err {
        OrchestratorError::LimitExceeded { scope: LimitScope::Project(_), live, max } => {
            assert_eq!(live, 2);
            assert_eq!(max, 2);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(h.runtime.container_names(), containers);
    assert!(h.registry.find_agent(&id("c")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_global_limit_spans_projects() {
    let h = Harness::new(1, 5);
    h.create("a").await.unwrap();

    let other_repo = tempfile::tempdir().unwrap();
    let mut options = h.options("b", "main");
    options.project_path = other_repo.path().to_path_buf();
    let err = h.orchestrator.create(options).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::LimitExceeded { scope: LimitScope::Global, .. }));
    assert_eq!(err.exit_code(), 11);
}

#[tokio::test]
async fn test_removed_agents_free_their_slot() {
    let h = Harness::new(5, 1);
    h.create("a").await.unwrap();
    h.orchestrator.stop(&id("a"), true).await.unwrap();
    h.create("b").await.unwrap();
}

#[tokio::test]
async fn test_attach_starts_stopped_agent_and_rebootstraps() {
    let h = Harness::new(5, 5);
    h.create("demo-1").await.unwrap();

    let outcome = h.orchestrator.stop(&id("demo-1"), false).await.unwrap();
    assert!(matches!(outcome, StopOutcome::Stopped { ref agent } if agent.status == AgentStatus::Stopped));
    assert_eq!(h.runtime.state_of("magents-demo-1"), Some(ContainerState::Exited));

    let target = h.orchestrator.attach(&id("demo-1")).await.unwrap();
    assert_eq!(target.handle.as_str(), "magents-demo-1");
    assert_eq!(h.runtime.state_of("magents-demo-1"), Some(ContainerState::Running));
    assert_eq!(h.registry.find_agent(&id("demo-1")).await.unwrap().unwrap().status, AgentStatus::Running);
    // Stopping killed the tmux server; attach recreated the session
    assert_eq!(h.runtime.windows_of("magents-demo-1", "magents-demo-1").len(), 2);
}

#[tokio::test]
async fn test_attach_restarts_container_that_exited_underneath() {
    let h = Harness::new(5, 5);
    h.create("demo-1").await.unwrap();
    h.runtime.set_state("magents-demo-1", ContainerState::Exited);
    let mut events = h.orchestrator.events().subscribe();

    h.orchestrator.attach(&id("demo-1")).await.unwrap();
    assert_eq!(h.runtime.state_of("magents-demo-1"), Some(ContainerState::Running));
    assert_eq!(h.registry.find_agent(&id("demo-1")).await.unwrap().unwrap().status, AgentStatus::Running);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e, AgentLifecycleEvent::AgentStarted { .. })));

    // Already running: nothing to announce
    let mut events = h.orchestrator.events().subscribe();
    h.orchestrator.attach(&id("demo-1")).await.unwrap();
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, AgentLifecycleEvent::AgentStarted { .. }));
    }
}

#[tokio::test]
async fn test_attach_twice_does_not_rebootstrap() {
    let h = Harness::new(5, 5);
    h.create("demo-1").await.unwrap();
    let keys = h.runtime.keys_sent().len();

    h.orchestrator.attach(&id("demo-1")).await.unwrap();
    h.orchestrator.attach(&id("demo-1")).await.unwrap();

    assert_eq!(h.runtime.keys_sent().len(), keys);
    assert_eq!(h.runtime.windows_of("magents-demo-1", "magents-demo-1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_attach_readiness_failure_marks_error() {
    let h = Harness::new(5, 5);
    h.create("demo-1").await.unwrap();
    h.orchestrator.stop(&id("demo-1"), false).await.unwrap();
    h.runtime.never_ready("magents-demo-1");

    let err = h.orchestrator.attach(&id("demo-1")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::HealthTimeout { .. }));
    assert_eq!(h.registry.find_agent(&id("demo-1")).await.unwrap().unwrap().status, AgentStatus::Error);
    // The container is left for inspection
    assert!(h.runtime.state_of("magents-demo-1").is_some());
}

#[tokio::test]
async fn test_dotted_id_gets_attachable_session() {
    let h = Harness::new(5, 5);
    let created = h.orchestrator.create(h.options("agent_2.x", "main")).await.unwrap();

    assert_eq!(created.agent.handle.as_str(), "magents-agent_2.x");
    assert_eq!(created.attach.session, "magents-agent_2_x");
    assert_eq!(created.attach.command.last().map(String::as_str), Some("magents-agent_2_x"));
    assert_eq!(
        h.runtime.windows_of("magents-agent_2.x", "magents-agent_2_x"),
        vec!["main".to_string(), "git".to_string()]
    );

    let target = h.orchestrator.attach(&id("agent_2.x")).await.unwrap();
    assert_eq!(target.session, "magents-agent_2_x");
}

#[tokio::test]
async fn test_attach_unknown_agent() {
    let h = Harness::new(5, 5);
    let err = h.orchestrator.attach(&id("ghost")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound { kind: "agent", .. }));
    assert_eq!(err.exit_code(), 15);
}

#[tokio::test]
async fn test_stop_with_remove_deletes_everything() {
    let h = Harness::new(5, 5);
    let created = h.orchestrator.create(h.options("demo-1", "main")).await.unwrap();

    let outcome = h.orchestrator.stop(&id("demo-1"), true).await.unwrap();
    assert!(matches!(outcome, StopOutcome::Removed { .. }));

    assert!(matches!(
        h.orchestrator.show(&id("demo-1")).await,
        Err(OrchestratorError::NotFound { kind: "agent", .. })
    ));
    assert!(h.runtime.state_of("magents-demo-1").is_none());
    let project = h.registry.find_project_by_id(&created.project.id).await.unwrap().unwrap();
    assert!(project.agent_ids.is_empty());
}

#[tokio::test]
async fn test_stop_with_missing_container_leaves_registry_untouched() {
    let h = Harness::new(5, 5);
    h.create("demo-1").await.unwrap();
    h.runtime.remove("magents-demo-1").await.unwrap();

    let err = h.orchestrator.stop(&id("demo-1"), false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound { kind: "container", .. }));
    assert_eq!(h.registry.find_agent(&id("demo-1")).await.unwrap().unwrap().status, AgentStatus::Running);
}

#[tokio::test]
async fn test_remove_with_missing_container_frees_the_slot() {
    let h = Harness::new(5, 1);
    let created = h.orchestrator.create(h.options("a", "main")).await.unwrap();
    h.runtime.remove("magents-a").await.unwrap();
    assert!(matches!(h.create("b").await, Err(OrchestratorError::LimitExceeded { .. })));

    let outcome = h.orchestrator.stop(&id("a"), true).await.unwrap();
    assert!(matches!(outcome, StopOutcome::Removed { .. }));
    assert!(h.registry.find_agent(&id("a")).await.unwrap().is_none());
    let project = h.registry.find_project_by_id(&created.project.id).await.unwrap().unwrap();
    assert!(project.agent_ids.is_empty());

    h.create("b").await.unwrap();
}

#[tokio::test]
async fn test_reconciled_error_record_can_be_removed() {
    let h = Harness::new(5, 1);
    h.create("a").await.unwrap();
    h.runtime.remove("magents-a").await.unwrap();

    let report = h.orchestrator.reconcile(true).await.unwrap();
    assert_eq!(report.agents_missing_container, vec![id("a")]);
    assert_eq!(h.registry.find_agent(&id("a")).await.unwrap().unwrap().status, AgentStatus::Error);

    h.orchestrator.stop(&id("a"), true).await.unwrap();
    assert!(h.registry.find_agent(&id("a")).await.unwrap().is_none());
    assert!(h.orchestrator.reconcile(false).await.unwrap().is_clean());
    h.create("b").await.unwrap();
}

#[tokio::test]
async fn test_cleanup_with_remove_tolerates_missing_container() {
    let h = Harness::new(5, 5);
    for agent in ["a", "b", "c"] {
        h.create(agent).await.unwrap();
    }
    h.runtime.remove("magents-b").await.unwrap();

    let report = h.orchestrator.cleanup_all(true).await.unwrap();
    assert_eq!(report.succeeded.len(), 3);
    assert!(report.failures.is_empty());
    assert!(h.registry.list_agents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cleanup_reports_partial_failure() {
    let h = Harness::new(5, 5);
    for agent in ["a", "b", "c"] {
        h.create(agent).await.unwrap();
    }
    h.runtime.remove("magents-b").await.unwrap();

    let err = h.orchestrator.cleanup_all(false).await.unwrap_err();
    match &err {
        OrchestratorError::PartialFailure { succeeded, failures } => {
            assert_eq!(*succeeded, 2);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id, "b");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.exit_code(), 16);
    assert_eq!(h.registry.find_agent(&id("a")).await.unwrap().unwrap().status, AgentStatus::Stopped);
    assert_eq!(h.registry.find_agent(&id("c")).await.unwrap().unwrap().status, AgentStatus::Stopped);
}

#[tokio::test]
async fn test_cleanup_with_remove_empties_registry() {
    let h = Harness::new(5, 5);
    h.create("a").await.unwrap();
    h.create("b").await.unwrap();

    let report = h.orchestrator.cleanup_all(true).await.unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(h.registry.list_agents().await.unwrap().is_empty());
    assert!(h.runtime.container_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_timeout_rolls_back_container() {
    let h = Harness::new(5, 5);
    h.runtime.never_ready("magents-slow");

    let err = h.create("slow").await.unwrap_err();
    match &err {
        OrchestratorError::CreateFailed { source, rollback } => {
            match source.as_ref() {
                OrchestratorError::HealthTimeout { elapsed, last_status, .. } => {
                    assert!(elapsed.as_secs() >= 5);
                    assert_eq!(last_status, "created");
                }
                other => panic!("unexpected source {:?}", other),
            }
            assert_eq!(*rollback, RollbackOutcome::ContainerRemoved);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.code(), "health_timeout");
    assert!(err.is_retryable());
    assert!(h.runtime.state_of("magents-slow").is_none());
    assert!(h.registry.find_agent(&id("slow")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_create_rolls_back() {
    let h = Harness::new(5, 5);
    h.runtime.never_ready("magents-slow");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.orchestrator.create_with_cancel(h.options("slow", "main"), &cancel).await.unwrap_err();
    assert_eq!(err.code(), "cancelled");
    assert!(h.runtime.state_of("magents-slow").is_none());
}

#[tokio::test]
async fn test_failed_rollback_reports_orphan_then_reconcile_removes_it() {
    let h = Harness::new(5, 5);
    h.runtime.fail_on(FailOn::Exec, "exec unavailable");
    h.runtime.fail_on(FailOn::Remove, "device busy");

    let err = h.create("demo-1").await.unwrap_err();
    match &err {
        OrchestratorError::CreateFailed { source, rollback } => {
            assert!(matches!(source.as_ref(), OrchestratorError::Bootstrap(_)));
            assert!(matches!(rollback, RollbackOutcome::OrphanLeft { handle, .. } if handle == "magents-demo-1"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("orphan left"));

    h.runtime.clear_failure(FailOn::Exec);
    h.runtime.clear_failure(FailOn::Remove);

    let report = h.orchestrator.reconcile(false).await.unwrap();
    assert_eq!(report.orphan_containers, vec!["magents-demo-1".to_string()]);
    assert!(h.runtime.state_of("magents-demo-1").is_some());

    let report = h.orchestrator.reconcile(true).await.unwrap();
    assert!(report.failures.is_empty());
    assert!(h.runtime.state_of("magents-demo-1").is_none());
    assert!(h.orchestrator.reconcile(false).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_untracked_container_is_a_conflict() {
    let h = Harness::new(5, 5);
    h.runtime.insert_container("magents-demo-1", ContainerState::Running, BTreeMap::new());

    let err = h.create("demo-1").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict { .. }));
    assert_eq!(err.exit_code(), 13);
    // Someone else's container is never touched
    assert_eq!(h.runtime.state_of("magents-demo-1"), Some(ContainerState::Running));
    assert!(h.registry.find_agent(&id("demo-1")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconcile_repairs_registry_drift() {
    let h = Harness::new(5, 5);
    let created = h.orchestrator.create(h.options("gone", "main")).await.unwrap();
    h.create("dangling").await.unwrap();

    // Container vanished behind the registry's back
    h.runtime.remove("magents-gone").await.unwrap();
    // Record vanished, project still lists it, container remains
    h.registry.remove_agent(&id("dangling")).await.unwrap();

    let report = h.orchestrator.reconcile(true).await.unwrap();
    assert_eq!(report.agents_missing_container, vec![id("gone")]);
    assert_eq!(report.dangling_agent_ids.len(), 1);
    assert_eq!(report.dangling_agent_ids[0].agent_id, "dangling");
    assert_eq!(report.orphan_containers, vec!["magents-dangling".to_string()]);
    assert!(report.failures.is_empty());

    assert_eq!(h.registry.find_agent(&id("gone")).await.unwrap().unwrap().status, AgentStatus::Error);
    let project = h.registry.find_project_by_id(&created.project.id).await.unwrap().unwrap();
    assert_eq!(project.agent_ids, vec![id("gone")]);
    assert!(h.runtime.state_of("magents-dangling").is_none());

    assert!(h.orchestrator.reconcile(false).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_list_filters_and_live_state() {
    let h = Harness::new(5, 5);
    h.create("a").await.unwrap();
    h.create("b").await.unwrap();
    h.orchestrator.stop(&id("b"), false).await.unwrap();

    let all = h.orchestrator.list(&ListFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let b = all.iter().find(|v| v.agent.id == id("b")).unwrap();
    assert_eq!(b.container_status, "exited");

    let running = h
        .orchestrator
        .list(&ListFilter { status: Some(AgentStatus::Running), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].agent.id, id("a"));

    let elsewhere = tempfile::tempdir().unwrap();
    let none = h
        .orchestrator
        .list(&ListFilter { project_path: Some(elsewhere.path().to_path_buf()), ..Default::default() })
        .await
        .unwrap();
    assert!(none.is_empty());

    let here = h
        .orchestrator
        .list(&ListFilter { project_path: Some(h.repo.path().to_path_buf()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(here.len(), 2);
}

#[tokio::test]
async fn test_projects_are_reused_and_detected() {
    let h = Harness::new(5, 5);
    std::fs::write(h.repo.path().join("Cargo.toml"), "[package]\nname = \"shop\"\n").unwrap();
    h.create("a").await.unwrap();
    h.create("b").await.unwrap();

    let projects = h.orchestrator.list_projects().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].agent_ids, vec![id("a"), id("b")]);
    assert_eq!(projects[0].project_type.as_ref().map(|t| t.language.as_str()), Some("rust"));

    let found = h.orchestrator.find_project(h.repo.path()).await.unwrap().unwrap();
    assert_eq!(found.id, projects[0].id);
}

#[tokio::test]
async fn test_import_legacy_records() {
    let h = Harness::new(5, 5);
    h.create("existing").await.unwrap();
    let repo = h.repo.path().display().to_string();
    let json = serde_json::json!([
        {"id": "legacy-1", "branch": "feature/old", "repoRoot": repo, "status": "RUNNING"},
        {"id": "existing", "repoRoot": repo},
        {"id": "broken"}
    ])
    .to_string();

    let report = h.orchestrator.import_legacy(parse_legacy_registry(&json).unwrap()).await.unwrap();
    assert_eq!(report.imported, vec![id("legacy-1")]);
    assert_eq!(report.skipped, vec![id("existing")]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "broken");

    let imported = h.registry.find_agent(&id("legacy-1")).await.unwrap().unwrap();
    assert_eq!(imported.handle.as_str(), "magents-legacy-1");
    let project = h.registry.find_project_by_id(&imported.project_id).await.unwrap().unwrap();
    assert!(project.owns(&id("legacy-1")));
}

#[tokio::test]
async fn test_lifecycle_on_sqlite_registry() {
    let db_dir = tempfile::tempdir().unwrap();
    let backend = StorageBackend::Sqlite(SqliteConfig { database_path: db_dir.path().join("magents.db") });
    let registry = create_registry(&backend, "magents").await.unwrap();
    let h = Harness::with_registry(5, 5, registry);

    h.create("demo-1").await.unwrap();
    h.orchestrator.stop(&id("demo-1"), false).await.unwrap();
    h.orchestrator.attach(&id("demo-1")).await.unwrap();
    assert_eq!(h.registry.find_agent(&id("demo-1")).await.unwrap().unwrap().status, AgentStatus::Running);

    h.orchestrator.stop(&id("demo-1"), true).await.unwrap();
    assert!(h.registry.find_agent(&id("demo-1")).await.unwrap().is_none());
    let projects = h.registry.list_projects().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert!(projects[0].agent_ids.is_empty());
    assert!(projects[0].version >= 3);
}
