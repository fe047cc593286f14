//! Play, block and task definitions.
//!
//! These are the compiled forms the scheduler works on. Loader data is
//! turned into them by [`PlaySource`](source::PlaySource); tasks are shared
//! as `Arc<Task>` so that results and handler ledgers can point at the
//! task that produced them.

pub mod source;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use crate::inventory::{HostOrder, PatternInput};

pub use source::PlaySource;

/// Actions the strategy interprets itself instead of dispatching
pub const META_ACTION: &str = "meta";

/// A task to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identity used for lockstep comparison and handler ledgers
    pub id: Uuid,

    /// Name of the task
    #[serde(default)]
    pub name: String,

    /// Action (module) to run
    pub action: String,

    /// Action arguments, an object
    #[serde(default)]
    pub args: JsonMap<String, JsonValue>,

    /// Conditionals, all must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<String>,

    /// Register result in variable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,

    /// Handlers to notify on change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,

    /// Items to loop over: a list or a template yielding one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_items: Option<JsonValue>,

    /// Variable name for the current item
    pub loop_var: String,

    /// Retry until this holds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,

    /// Number of retries for `until`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Delay between retries in seconds
    pub delay: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_when: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_when: Option<String>,

    #[serde(default)]
    pub ignore_errors: bool,

    /// Run on one host and broadcast the result
    #[serde(default)]
    pub run_once: bool,

    /// Hide results from output and registered variables
    #[serde(default)]
    pub no_log: bool,

    /// Extra names a handler answers to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,

    /// Names of enclosing includes, innermost last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,

    /// Role this task came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Task-level variables
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: IndexMap<String, JsonValue>,

    /// Whether this task is a handler
    #[serde(default)]
    pub is_handler: bool,
}

impl Task {
    /// Creates a new task.
    pub fn new(action: impl Into<String>, args: JsonMap<String, JsonValue>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            action: action.into(),
            args,
            when: Vec::new(),
            register: None,
            notify: Vec::new(),
            loop_items: None,
            loop_var: "item".to_string(),
            until: None,
            retries: None,
            delay: 5,
            changed_when: None,
            failed_when: None,
            ignore_errors: false,
            run_once: false,
            no_log: false,
            listen: Vec::new(),
            parents: Vec::new(),
            role: None,
            vars: IndexMap::new(),
            is_handler: false,
        }
    }

    /// Set the task name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// A `meta: <op>` task
    pub fn meta(op: &str) -> Self {
        let mut args = JsonMap::new();
        args.insert("_raw_params".into(), JsonValue::from(op));
        Self::new(META_ACTION, args)
    }

    /// The implicit fact gathering task
    pub fn gather_facts() -> Self {
        Self::new("setup", JsonMap::new()).named("Gathering Facts")
    }

    /// Name, falling back to the action
    pub fn get_name(&self) -> &str {
        if self.name.is_empty() {
            &self.action
        } else {
            &self.name
        }
    }

    /// `role : name` for role tasks, otherwise the name
    pub fn display_name(&self) -> String {
        match &self.role {
            Some(role) => format!("{} : {}", role, self.get_name()),
            None => self.get_name().to_string(),
        }
    }

    pub fn is_meta(&self) -> bool {
        self.action == META_ACTION
    }

    /// Operation of a meta task
    pub fn meta_op(&self) -> Option<&str> {
        if !self.is_meta() {
            return None;
        }
        self.args.get("_raw_params").and_then(JsonValue::as_str)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Tasks with optional rescue and always sections
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub name: Option<String>,
    pub block: Vec<Arc<Task>>,
    pub rescue: Vec<Arc<Task>>,
    pub always: Vec<Arc<Task>>,
}

impl Block {
    /// A block holding only regular tasks
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            block: tasks.into_iter().map(Arc::new).collect(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty() && self.rescue.is_empty() && self.always.is_empty()
    }
}

/// Serial batch size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerialSpec {
    /// Fixed batch size
    Fixed(usize),
    /// Percentage of hosts, `"30%"`
    Percentage(String),
}

impl SerialSpec {
    /// Batch size for a host count, at least one
    pub fn batch_size(&self, total: usize) -> usize {
        let size = match self {
            Self::Fixed(n) => *n,
            Self::Percentage(p) => {
                let pct: f64 = p.trim().trim_end_matches('%').parse().unwrap_or(100.0);
                ((total as f64) * pct / 100.0).floor() as usize
            }
        };
        size.clamp(1, total.max(1))
    }
}

/// One pass of blocks over a host pattern
#[derive(Debug, Clone)]
pub struct Play {
    pub name: String,
    pub hosts: Vec<String>,
    pub order: HostOrder,
    /// Strategy override
    pub strategy: Option<String>,
    /// Serial batch sizes; the last one repeats
    pub serial: Vec<SerialSpec>,
    /// Gather facts override
    pub gather_facts: Option<bool>,
    pub force_handlers: Option<bool>,
    pub vars: IndexMap<String, JsonValue>,
    pub blocks: Vec<Block>,
    pub handlers: Vec<Arc<Task>>,
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: vec![hosts.into()],
            order: HostOrder::default(),
            strategy: None,
            serial: Vec::new(),
            gather_facts: Some(false),
            force_handlers: None,
            vars: IndexMap::new(),
            blocks: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Host pattern as resolver input
    pub fn pattern(&self) -> PatternInput {
        PatternInput::from(self.hosts.clone())
    }

    /// Append a block of plain tasks
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.blocks.push(Block::from_tasks(tasks));
        self
    }

    /// Append a block
    pub fn with_block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    /// Append handlers
    pub fn with_handlers(mut self, handlers: Vec<Task>) -> Self {
        self.handlers.extend(handlers.into_iter().map(|mut h| {
            h.is_handler = true;
            Arc::new(h)
        }));
        self
    }

    /// Number of tasks across all blocks
    pub fn task_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.block.len() + b.rescue.len() + b.always.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names() {
        let task = Task::new("ping", JsonMap::new());
        assert_eq!(task.get_name(), "ping");

        let mut named = Task::new("service", JsonMap::new()).named("restart nginx");
        named.role = Some("web".into());
        assert_eq!(named.display_name(), "web : restart nginx");
    }

    #[test]
    fn test_meta_task() {
        let task = Task::meta("flush_handlers");
        assert!(task.is_meta());
        assert_eq!(task.meta_op(), Some("flush_handlers"));
        assert_eq!(Task::new("ping", JsonMap::new()).meta_op(), None);
    }

    #[test]
    fn test_serial_batch_size() {
        assert_eq!(SerialSpec::Fixed(2).batch_size(5), 2);
        assert_eq!(SerialSpec::Fixed(0).batch_size(5), 1);
        assert_eq!(SerialSpec::Fixed(10).batch_size(5), 5);
        assert_eq!(SerialSpec::Percentage("50%".into()).batch_size(5), 2);
        assert_eq!(SerialSpec::Percentage("10%".into()).batch_size(5), 1);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::new("ping", JsonMap::new());
        let b = Task::new("ping", JsonMap::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.clone().id, a.id);
    }
}
