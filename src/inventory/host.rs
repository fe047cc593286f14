//! Host definition for the Armada inventory.
//!
//! A `Host` is a named automation target with its own variable overlay and
//! the names of the groups it was directly added to. Identity is the name.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::hash::{Hash, Hasher};

/// A managed node in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Inventory hostname (unique key)
    pub name: String,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, JsonValue>,

    /// Groups this host was directly added to
    #[serde(default)]
    pub groups: IndexSet<String>,

    /// Created on demand for a localhost alias rather than declared by a source
    #[serde(default)]
    pub implicit: bool,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
            groups: IndexSet::new(),
            implicit: false,
        }
    }

    /// Create the implicit localhost materialized for an alias lookup
    pub fn implicit_localhost(name: impl Into<String>) -> Self {
        let mut host = Self::new(name);
        host.implicit = true;
        host.set_var("ansible_connection", JsonValue::from("local"));
        host
    }

    /// Parse a `host:port` address, keeping the port as `ansible_port`
    pub fn with_address(name: impl Into<String>, port: Option<u16>) -> Self {
        let mut host = Self::new(name);
        if let Some(port) = port {
            host.set_var("ansible_port", JsonValue::from(port));
        }
        host
    }

    /// Record direct membership in a group
    pub fn add_group(&mut self, group: impl Into<String>) -> bool {
        self.groups.insert(group.into())
    }

    /// Drop direct membership in a group
    pub fn remove_group(&mut self, group: &str) -> bool {
        self.groups.shift_remove(group)
    }

    /// Check direct membership
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Set a variable on this host
    pub fn set_var(&mut self, key: impl Into<String>, value: JsonValue) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this host
    pub fn get_var(&self, key: &str) -> Option<&JsonValue> {
        self.vars.get(key)
    }

    /// Overlay variables; incoming values win
    pub fn merge_vars(&mut self, vars: &IndexMap<String, JsonValue>) {
        for (key, value) in vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
