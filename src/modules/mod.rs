//! Action dispatch.
//!
//! Actions (modules) are external to the scheduler: a worker hands a task
//! and its rendered arguments to an [`ActionDispatcher`] and gets back a raw
//! JSON payload that becomes a [`TaskResult`](crate::executor::task_result::TaskResult).
//! [`ActionRegistry`] is the built-in dispatcher, mapping action names to
//! [`Action`] implementations.

pub mod command;
pub mod inventory;
pub mod logic;
pub mod setup;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::connection::{Connection, ConnectionError, ConnectionRegistry};
use crate::playbook::Task;
use crate::template::{Templar, Vars};

/// Why an action did not produce a result
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Couldn't resolve module/action '{0}'")]
    NotFound(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The action ran and failed
    #[error("{0}")]
    Failed(String),

    /// The host could not be reached
    #[error("{0}")]
    Unreachable(String),

    #[error(transparent)]
    Template(#[from] crate::error::Error),
}

impl ActionError {
    /// Result payload describing the error
    pub fn into_payload(self) -> JsonValue {
        match self {
            ActionError::Unreachable(msg) => json!({"unreachable": true, "changed": false, "msg": msg}),
            other => json!({"failed": true, "changed": false, "msg": other.to_string()}),
        }
    }
}

impl From<ConnectionError> for ActionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::ConnectionFailed(_)
            | ConnectionError::Timeout(_)
            | ConnectionError::UnsupportedTransport(_) => ActionError::Unreachable(err.to_string()),
            other => ActionError::Failed(other.to_string()),
        }
    }
}

pub type ActionResult = Result<JsonValue, ActionError>;

/// What an action may use while running on one host
#[derive(Clone)]
pub struct ActionContext {
    pub host: String,
    pub vars: Vars,
    pub templar: Arc<dyn Templar>,
    pub connections: Arc<ConnectionRegistry>,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("host", &self.host)
            .field("vars", &self.vars.len())
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    /// Connection to the host, opened on first use
    pub fn connection(&self) -> Result<Arc<dyn Connection>, ActionError> {
        Ok(self.connections.get(&self.host, &self.vars)?)
    }
}

/// A single action implementation
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Other names the action answers to
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult;
}

/// Turns a task into a raw result payload
#[async_trait]
pub trait ActionDispatcher: Send + Sync + fmt::Debug {
    /// Never fails: errors come back as `failed`/`unreachable` payloads
    async fn dispatch(
        &self,
        task: &Task,
        args: &JsonMap<String, JsonValue>,
        ctx: &ActionContext,
    ) -> JsonValue;
}

/// Name to action map
#[derive(Debug, Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Control-node logic
        registry.register(Arc::new(logic::PingAction));
        registry.register(Arc::new(logic::DebugAction));
        registry.register(Arc::new(logic::SetFactAction));
        registry.register(Arc::new(logic::SetStatsAction));
        registry.register(Arc::new(logic::FailAction));
        registry.register(Arc::new(logic::AssertAction));

        // Remote commands
        registry.register(Arc::new(command::CommandAction));
        registry.register(Arc::new(command::ShellAction));
        registry.register(Arc::new(setup::SetupAction));

        // Inventory side effects
        registry.register(Arc::new(inventory::AddHostAction));
        registry.register(Arc::new(inventory::GroupByAction));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        for alias in action.aliases() {
            self.actions.insert(alias.to_string(), Arc::clone(&action));
        }
        self.actions.insert(action.name().to_string(), action);
    }

    /// Look up by name; a dotted collection name resolves by its last part
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions
            .get(name)
            .or_else(|| name.rsplit('.').next().and_then(|short| self.actions.get(short)))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ActionDispatcher for ActionRegistry {
    async fn dispatch(
        &self,
        task: &Task,
        args: &JsonMap<String, JsonValue>,
        ctx: &ActionContext,
    ) -> JsonValue {
        let Some(action) = self.get(&task.action) else {
            return ActionError::NotFound(task.action.clone()).into_payload();
        };
        debug!(host = %ctx.host, action = action.name(), "Running action");
        match action.run(args, ctx).await {
            Ok(payload) => payload,
            Err(e) => e.into_payload(),
        }
    }
}

/// Argument as a string
pub(crate) fn arg_str<'a>(args: &'a JsonMap<String, JsonValue>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(JsonValue::as_str)
}

/// Argument as a boolean, accepting yes/no style strings
pub(crate) fn arg_bool(args: &JsonMap<String, JsonValue>, key: &str, default: bool) -> bool {
    match args.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "1" | "on"
        ),
        Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => default,
    }
}

/// Argument as a list of strings; a string is split on commas
pub(crate) fn arg_list(args: &JsonMap<String, JsonValue>, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(JsonValue::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
