//! Group definition for the Armada inventory.
//!
//! Groups keep members and children in insertion order so that group
//! expansion is deterministic.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Name of the group every host is reachable from
pub const ALL: &str = "all";

/// Name of the group holding hosts with no other membership
pub const UNGROUPED: &str = "ungrouped";

/// A group of hosts in the inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Direct member host names
    #[serde(default)]
    pub hosts: IndexSet<String>,

    /// Child group names
    #[serde(default)]
    pub children: IndexSet<String>,

    /// Parent group names (maintained alongside children)
    #[serde(skip)]
    pub parents: IndexSet<String>,

    /// Group-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,
}

impl Group {
    /// Create a new group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether this is one of the two structural groups
    pub fn is_structural(&self) -> bool {
        self.name == ALL || self.name == UNGROUPED
    }

    /// Add a host to this group
    pub fn add_host(&mut self, host: impl Into<String>) -> bool {
        self.hosts.insert(host.into())
    }

    /// Remove a host from this group
    pub fn remove_host(&mut self, host: &str) -> bool {
        self.hosts.shift_remove(host)
    }

    /// Check if a host belongs directly to this group
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Add a child group
    pub fn add_child(&mut self, child: impl Into<String>) -> bool {
        self.children.insert(child.into())
    }

    /// Remove a child group
    pub fn remove_child(&mut self, child: &str) -> bool {
        self.children.shift_remove(child)
    }

    /// Check if a group is a direct child of this group
    pub fn has_child(&self, child: &str) -> bool {
        self.children.contains(child)
    }

    /// Set a variable on this group
    pub fn set_var(&mut self, key: impl Into<String>, value: JsonValue) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this group
    pub fn get_var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
