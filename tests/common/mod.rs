//! Shared test utilities and fixtures for the Armada test suite.
//!
//! This module provides:
//! - A scripted action dispatcher that records every dispatch
//! - A recording callback plugin
//! - Fluent builders for tasks and inventories
//! - Temporary directory management
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tempfile::TempDir;

use armada::callback::{CallbackEvent, CallbackManager, CallbackPlugin};
use armada::config::Config;
use armada::executor::{ExecutionContext, PlaybookExecutor};
use armada::inventory::{InventoryData, InventoryManager};
use armada::loader::YamlLoader;
use armada::modules::{ActionContext, ActionDispatcher, ActionRegistry};
use armada::playbook::Task;

// ============================================================================
// Scripted Actions
// ============================================================================

/// What a scripted rule does when it matches
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Return this payload
    Payload(JsonValue),
    /// Sleep, then return the payload
    Delayed(Duration, JsonValue),
    /// Panic inside the worker
    Panic,
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    task: String,
    outcome: Outcome,
}

/// One recorded dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub host: String,
    pub task: String,
    pub args: JsonMap<String, JsonValue>,
}

/// An [`ActionDispatcher`] with scripted answers per (host, task name).
///
/// Unscripted tasks fall through to the built-in actions, so `debug`,
/// `set_fact`, `ping` and friends behave normally.
///
/// # Example
///
/// ```rust,ignore
/// let actions = ScriptedActions::new().fail_on("web2", "deploy");
/// let result = run_play(play, inventory, actions.clone()).await;
/// assert_eq!(actions.hosts_for("deploy"), vec!["web1", "web2"]);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedActions {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    load: Mutex<Load>,
    builtins: ActionRegistry,
}

/// Dispatches running right now and the highest counts seen
#[derive(Debug, Default)]
struct Load {
    running: usize,
    peak: usize,
    per_host: HashMap<String, usize>,
    peak_per_host: HashMap<String, usize>,
}

impl Load {
    fn enter(&mut self, host: &str) {
        self.running += 1;
        self.peak = self.peak.max(self.running);
        let count = self.per_host.entry(host.to_string()).or_default();
        *count += 1;
        let count = *count;
        let peak = self.peak_per_host.entry(host.to_string()).or_default();
        *peak = (*peak).max(count);
    }

    fn leave(&mut self, host: &str) {
        self.running = self.running.saturating_sub(1);
        if let Some(count) = self.per_host.get_mut(host) {
            *count = count.saturating_sub(1);
        }
    }
}

impl ScriptedActions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            load: Mutex::new(Load::default()),
            builtins: ActionRegistry::with_builtins(),
        })
    }

    fn push(self: Arc<Self>, host: Option<&str>, task: &str, outcome: Outcome) -> Arc<Self> {
        self.rules.lock().push(Rule {
            host: host.map(String::from),
            task: task.to_string(),
            outcome,
        });
        self
    }

    /// Answer `task` on `host` with a payload
    pub fn respond(self: Arc<Self>, host: &str, task: &str, payload: JsonValue) -> Arc<Self> {
        self.push(Some(host), task, Outcome::Payload(payload))
    }

    /// Answer `task` on every host with a payload
    pub fn respond_all(self: Arc<Self>, task: &str, payload: JsonValue) -> Arc<Self> {
        self.push(None, task, Outcome::Payload(payload))
    }

    pub fn fail_on(self: Arc<Self>, host: &str, task: &str) -> Arc<Self> {
        self.respond(host, task, json!({"failed": true, "msg": format!("{} failed", task)}))
    }

    pub fn unreachable_on(self: Arc<Self>, host: &str, task: &str) -> Arc<Self> {
        self.respond(host, task, json!({"unreachable": true, "msg": "Failed to connect"}))
    }

    pub fn changed_on_all(self: Arc<Self>, task: &str) -> Arc<Self> {
        self.respond_all(task, json!({"changed": true}))
    }

    pub fn delay_on(self: Arc<Self>, host: &str, task: &str, delay: Duration) -> Arc<Self> {
        self.push(Some(host), task, Outcome::Delayed(delay, json!({"changed": false})))
    }

    /// Sleep on every host before answering `task`
    pub fn delay_all(self: Arc<Self>, task: &str, delay: Duration) -> Arc<Self> {
        self.push(None, task, Outcome::Delayed(delay, json!({"changed": false})))
    }

    /// Most dispatches that were running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.load.lock().peak
    }

    /// Per host, the most dispatches that were running at the same time
    pub fn peak_in_flight_per_host(&self) -> HashMap<String, usize> {
        self.load.lock().peak_per_host.clone()
    }

    pub fn panic_on(self: Arc<Self>, host: &str, task: &str) -> Arc<Self> {
        self.push(Some(host), task, Outcome::Panic)
    }

    /// Every dispatch, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Hosts a task was dispatched to, in arrival order
    pub fn hosts_for(&self, task: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.task == task)
            .map(|c| c.host.clone())
            .collect()
    }

    /// Task names dispatched to a host, in order
    pub fn tasks_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.task.clone())
            .collect()
    }

    /// Rendered arguments of the dispatch of `task` on `host`
    pub fn args_for(&self, host: &str, task: &str) -> Option<JsonMap<String, JsonValue>> {
        self.calls
            .lock()
            .iter()
            .find(|c| c.host == host && c.task == task)
            .map(|c| c.args.clone())
    }

    fn outcome(&self, host: &str, task: &str) -> Option<Outcome> {
        let rules = self.rules.lock();
        rules
            .iter()
            .find(|r| r.task == task && r.host.as_deref() == Some(host))
            .or_else(|| rules.iter().find(|r| r.task == task && r.host.is_none()))
            .map(|r| r.outcome.clone())
    }
}

#[async_trait]
impl ActionDispatcher for ScriptedActions {
    async fn dispatch(
        &self,
        task: &Task,
        args: &JsonMap<String, JsonValue>,
        ctx: &ActionContext,
    ) -> JsonValue {
        let name = task.get_name().to_string();
        self.calls.lock().push(Call {
            host: ctx.host.clone(),
            task: name.clone(),
            args: args.clone(),
        });

        self.load.lock().enter(&ctx.host);
        let payload = match self.outcome(&ctx.host, &name) {
            Some(Outcome::Payload(payload)) => payload,
            Some(Outcome::Delayed(delay, payload)) => {
                tokio::time::sleep(delay).await;
                payload
            }
            Some(Outcome::Panic) => panic!("scripted panic for {} on {}", name, ctx.host),
            None => self.builtins.dispatch(task, args, ctx).await,
        };
        self.load.lock().leave(&ctx.host);
        payload
    }
}

// ============================================================================
// Recording Callback
// ============================================================================

/// Callback plugin that keeps every event
#[derive(Debug, Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().clone()
    }

    /// Event kinds in delivery order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(CallbackEvent::kind).collect()
    }

    /// Names of started tasks, in order
    pub fn task_starts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::TaskStart { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of started handlers, in order
    pub fn handler_starts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::HandlerTaskStart { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of events of one kind
    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

impl CallbackPlugin for RecordingCallback {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_event(&self, event: &CallbackEvent) {
        self.events.lock().push(event.clone());
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Fluent builder for [`Task`]
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            task: Task::new(action, JsonMap::new()).named(name),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.task.args.insert(key.into(), value.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.task.when.push(condition.into());
        self
    }

    pub fn notify(mut self, handler: impl Into<String>) -> Self {
        self.task.notify.push(handler.into());
        self
    }

    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.task.register = Some(name.into());
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.task.ignore_errors = true;
        self
    }

    pub fn run_once(mut self) -> Self {
        self.task.run_once = true;
        self
    }

    pub fn listen(mut self, topic: impl Into<String>) -> Self {
        self.task.listen.push(topic.into());
        self
    }

    pub fn loop_over(mut self, items: Vec<JsonValue>) -> Self {
        self.task.loop_items = Some(JsonValue::Array(items));
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Shorthand for a named task with no arguments
pub fn task(name: &str, action: &str) -> Task {
    TaskBuilder::new(name, action).build()
}

/// Fluent builder for an in-memory inventory
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    data: InventoryData,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self {
            data: InventoryData::new(),
        }
    }

    /// Add hosts to a group, creating it under `all`
    pub fn group(mut self, group: &str, hosts: &[&str]) -> Self {
        self.data.add_group(group).expect("group");
        for host in hosts {
            self.data.add_host(host, Some(group)).expect("host");
        }
        self
    }

    /// Link a child group under a parent
    pub fn child(mut self, parent: &str, child: &str) -> Self {
        self.data.add_group(parent).expect("parent");
        self.data.add_group(child).expect("child");
        self.data.add_child_group(parent, child).expect("child group");
        self
    }

    pub fn host_var(mut self, host: &str, key: &str, value: JsonValue) -> Self {
        self.data.set_variable(host, key, value).expect("host var");
        self
    }

    pub fn build(self) -> InventoryManager {
        InventoryManager::from_data(self.data, Arc::new(YamlLoader::default()))
    }
}

/// `web: web1..web3`, `db: db1..db2`
pub fn web_and_db() -> InventoryManager {
    InventoryBuilder::new()
        .group("web", &["web1", "web2", "web3"])
        .group("db", &["db1", "db2"])
        .build()
}

// ============================================================================
// Executor helpers
// ============================================================================

/// Executor wired to scripted actions and a recording callback
pub fn executor_with(
    config: Config,
    inventory: InventoryManager,
    actions: Arc<ScriptedActions>,
    callback: Arc<RecordingCallback>,
) -> PlaybookExecutor {
    let callbacks = CallbackManager::new(vec![callback as Arc<dyn CallbackPlugin>]);
    let ctx = ExecutionContext::new(config, inventory, callbacks).expect("execution context");
    PlaybookExecutor::from_context(ctx).with_actions(actions)
}

/// Executor with the default configuration
pub fn executor(
    inventory: InventoryManager,
    actions: Arc<ScriptedActions>,
    callback: Arc<RecordingCallback>,
) -> PlaybookExecutor {
    executor_with(Config::default(), inventory, actions, callback)
}

// ============================================================================
// Temporary directories
// ============================================================================

/// A temporary directory for on-disk sources
pub struct TestContext {
    dir: TempDir,
}

impl TestContext {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a file, making parent directories as needed
    pub fn create_file(&self, relative_path: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create an executable script
    #[cfg(unix)]
    pub fn create_script(&self, relative_path: &str, content: &str) -> std::io::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;
        let path = self.create_file(relative_path, content)?;
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms)?;
        Ok(path)
    }
}
