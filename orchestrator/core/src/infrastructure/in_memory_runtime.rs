// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process [`ContainerRuntime`] used by tests.
//!
//! Containers are plain records; `exec` interprets the small set of tmux
//! commands the session bootstrapper issues so bootstrap can be exercised
//! end to end. Failure knobs let tests inject runtime faults per operation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::runtime::{
    labels, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, HealthState, RuntimeError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailOn {
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    Exec,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: Option<ContainerSpec>,
    state: ContainerState,
    health: Option<HealthState>,
    labels: BTreeMap<String, String>,
    sessions: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    volumes: BTreeSet<String>,
    failures: BTreeMap<FailOn, String>,
    /// Containers that stay in `created` after start.
    stuck: BTreeSet<String>,
    exec_log: Vec<(String, Vec<String>)>,
    calls: usize,
    keys_sent: Vec<(String, String, String)>,
}

#[derive(Clone, Default)]
pub struct InMemoryContainerRuntime {
    state: Arc<RwLock<State>>,
}

impl InMemoryContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_volume(&self, name: &str) {
        self.state.write().volumes.insert(name.to_string());
    }

    /// Make every call of `op` fail with a `Rejected` error until cleared.
    pub fn fail_on(&self, op: FailOn, message: &str) {
        self.state.write().failures.insert(op, message.to_string());
    }

    pub fn clear_failure(&self, op: FailOn) {
        self.state.write().failures.remove(&op);
    }

    /// Keep `name` in `created` after start, as if its entrypoint never came up.
    pub fn never_ready(&self, name: &str) {
        self.state.write().stuck.insert(name.to_string());
    }

    /// Insert a container directly, bypassing `create`.
    pub fn insert_container(&self, name: &str, state: ContainerState, labels: BTreeMap<String, String>) {
        self.state.write().containers.insert(
            name.to_string(),
            FakeContainer { spec: None, state, health: None, labels, sessions: BTreeMap::new() },
        );
    }

    pub fn set_state(&self, name: &str, state: ContainerState) {
        if let Some(container) = self.state.write().containers.get_mut(name) {
            container.state = state;
        }
    }

    pub fn set_health(&self, name: &str, health: Option<HealthState>) {
        if let Some(container) = self.state.write().containers.get_mut(name) {
            container.health = health;
        }
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.state.read().containers.get(name).and_then(|c| c.spec.clone())
    }

    pub fn state_of(&self, name: &str) -> Option<ContainerState> {
        self.state.read().containers.get(name).map(|c| c.state.clone())
    }

    /// Windows of a tmux session, in creation order.
    pub fn windows_of(&self, name: &str, session: &str) -> Vec<String> {
        self.state
            .read()
            .containers
            .get(name)
            .and_then(|c| c.sessions.get(session).cloned())
            .unwrap_or_default()
    }

    /// `(container, target, text)` of every `send-keys`.
    pub fn keys_sent(&self) -> Vec<(String, String, String)> {
        self.state.read().keys_sent.clone()
    }

    pub fn exec_count(&self) -> usize {
        self.state.read().exec_log.len()
    }

    /// Number of runtime calls made so far, of any kind.
    pub fn call_count(&self) -> usize {
        self.state.read().calls
    }

    fn check(&self, op: FailOn) -> Result<(), RuntimeError> {
        let mut state = self.state.write();
        state.calls += 1;
        match state.failures.get(&op) {
            Some(message) => Err(RuntimeError::Rejected(message.clone())),
            None => Ok(()),
        }
    }

    fn info(name: &str, container: &FakeContainer) -> ContainerInfo {
        ContainerInfo {
            name: name.to_string(),
            state: container.state.clone(),
            health: container.health,
            labels: container.labels.clone(),
            image: container.spec.as_ref().map(|s| s.image.clone()),
        }
    }

    fn run_tmux(container: &mut FakeContainer, args: &[String], keys: &mut Vec<(String, String, String)>, name: &str) -> ExecOutput {
        let flag = |f: &str| args.iter().position(|a| a == f).and_then(|i| args.get(i + 1)).cloned();
        let fail = |msg: String| ExecOutput { exit_code: 1, stdout: String::new(), stderr: msg };
        let ok = ExecOutput::default();

        match args.first().map(String::as_str) {
            Some("has-session") => match flag("-t") {
                Some(session) if container.sessions.contains_key(&session) => ok,
                Some(session) => fail(format!("can't find session: {}", session)),
                None => fail("missing target".into()),
            },
            Some("new-session") => {
                let (Some(session), Some(window)) = (flag("-s"), flag("-n")) else {
                    return fail("missing session or window name".into());
                };
                // tmux stores the name with '.' and ':' replaced
                let session = session.replace(['.', ':'], "_");
                if container.sessions.contains_key(&session) {
                    return fail(format!("duplicate session: {}", session));
                }
                container.sessions.insert(session, vec![window]);
                ok
            }
            Some("list-windows") => match flag("-t").and_then(|session| container.sessions.get(&session)) {
                Some(windows) => ExecOutput {
                    exit_code: 0,
                    stdout: windows.iter().map(|w| format!("{}\n", w)).collect(),
                    stderr: String::new(),
                },
                None => fail("can't find session".into()),
            },
            Some("new-window") => {
                let (Some(session), Some(window)) = (flag("-t"), flag("-n")) else {
                    return fail("missing target or window name".into());
                };
                match container.sessions.get_mut(&session) {
                    Some(windows) => {
                        windows.push(window);
                        ok
                    }
                    None => fail(format!("can't find session: {}", session)),
                }
            }
            Some("send-keys") => {
                let Some(target) = flag("-t") else {
                    return fail("missing target".into());
                };
                let session = target.split(':').next().unwrap_or_default().to_string();
                if !container.sessions.contains_key(&session) {
                    return fail(format!("can't find session: {}", session));
                }
                // tmux send-keys -t <target> <text> Enter
                let text = args.iter().skip(3).take_while(|a| a.as_str() != "Enter").cloned().collect::<Vec<_>>().join(" ");
                keys.push((name.to_string(), target, text));
                ok
            }
            Some("select-window") => match flag("-t") {
                Some(target) if container.sessions.contains_key(target.split(':').next().unwrap_or_default()) => ok,
                Some(target) => fail(format!("can't find window: {}", target)),
                None => fail("missing target".into()),
            },
            _ => fail(format!("unsupported command: {:?}", args)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.check(FailOn::Create)?;
        let mut state = self.state.write();
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Rejected(format!("name '{}' already in use", spec.name)));
        }
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: Some(spec.clone()),
                state: ContainerState::Created,
                health: None,
                labels: spec.labels.clone(),
                sessions: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.check(FailOn::Start)?;
        let mut state = self.state.write();
        let stuck = state.stuck.contains(name);
        let container = state.containers.get_mut(name).ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        if !stuck {
            container.state = ContainerState::Running;
        }
        Ok(())
    }

    async fn stop(&self, name: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.check(FailOn::Stop)?;
        let mut state = self.state.write();
        let container = state.containers.get_mut(name).ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        if container.state.is_active() || container.state == ContainerState::Created {
            container.state = ContainerState::Exited;
        }
        // Stopping kills the tmux server with the container
        container.sessions.clear();
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.check(FailOn::Remove)?;
        self.state
            .write()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        self.check(FailOn::Inspect)?;
        Ok(self.state.read().containers.get(name).map(|c| Self::info(name, c)))
    }

    async fn volume_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.write();
        state.calls += 1;
        Ok(state.volumes.contains(name))
    }

    async fn list_managed(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        self.check(FailOn::Inspect)?;
        let state = self.state.read();
        let mut containers: Vec<ContainerInfo> = state
            .containers
            .iter()
            .filter(|(_, c)| c.labels.get(labels::MANAGED).map(|v| v == "true").unwrap_or(false))
            .map(|(name, c)| Self::info(name, c))
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.check(FailOn::Exec)?;
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.exec_log.push((name.to_string(), argv.to_vec()));
        let container = state.containers.get_mut(name).ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        if !container.state.is_running() {
            return Err(RuntimeError::Rejected(format!("container '{}' is not running", name)));
        }
        match argv.split_first() {
            Some((program, args)) if program == "tmux" => {
                Ok(Self::run_tmux(container, args, &mut state.keys_sent, name))
            }
            _ => Ok(ExecOutput::default()),
        }
    }
}
