//! The inventory store: hosts, groups, and their membership graph.
//!
//! All invariant enforcement lives here: names are unique per namespace, the
//! group graph stays acyclic, and [`InventoryData::reconcile`] keeps every
//! host reachable from `all` and `ungrouped` accurate.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use super::group::{Group, ALL, UNGROUPED};
use super::host::Host;
use super::InventoryError;

/// Default names that resolve to the implicit localhost
pub const LOCALHOST_ALIASES: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Hosts, groups, and the membership graph
#[derive(Debug)]
pub struct InventoryData {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
    localhost_aliases: Vec<String>,
    implicit_localhost: OnceCell<Host>,
    closure: HashMap<String, Vec<String>>,
}

impl Default for InventoryData {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryData {
    /// Create an empty store holding only `all` and `ungrouped`
    pub fn new() -> Self {
        Self::with_localhost_aliases(LOCALHOST_ALIASES.iter().map(|s| s.to_string()).collect())
    }

    /// Create an empty store with custom localhost aliases
    pub fn with_localhost_aliases(aliases: Vec<String>) -> Self {
        let mut groups = IndexMap::new();
        let mut all = Group::new(ALL);
        let mut ungrouped = Group::new(UNGROUPED);
        all.add_child(UNGROUPED);
        ungrouped.parents.insert(ALL.to_string());
        groups.insert(ALL.to_string(), all);
        groups.insert(UNGROUPED.to_string(), ungrouped);

        Self {
            hosts: IndexMap::new(),
            groups,
            localhost_aliases: aliases,
            implicit_localhost: OnceCell::new(),
            closure: HashMap::new(),
        }
    }

    /// Whether a name is a configured localhost alias
    pub fn is_localhost_alias(&self, name: &str) -> bool {
        self.localhost_aliases.iter().any(|a| a == name)
    }

    /// All explicitly declared hosts in insertion order
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// All groups in insertion order
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Number of explicitly declared hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Whether a host is explicitly declared
    pub fn has_host(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    /// Look up a group
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Mutable group lookup
    pub fn get_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.closure.clear();
        self.groups.get_mut(name)
    }

    /// Look up a host.
    ///
    /// A localhost alias that no source declared materializes the implicit
    /// localhost on first use. The implicit host is never a member of `all`.
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        if let Some(host) = self.hosts.get(name) {
            return Some(host);
        }
        if self.is_localhost_alias(name) {
            let host = self.implicit_localhost.get_or_init(|| {
                debug!("Materializing implicit localhost for '{}'", name);
                Host::implicit_localhost(name)
            });
            return Some(host);
        }
        None
    }

    /// The implicit localhost, if one has been materialized
    pub fn implicit_localhost(&self) -> Option<&Host> {
        self.implicit_localhost.get()
    }

    /// Mutable host lookup (declared hosts only)
    pub fn get_host_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.hosts.get_mut(name)
    }

    /// Add a group; existing groups are left untouched
    pub fn add_group(&mut self, name: &str) -> Result<&mut Group, InventoryError> {
        if name.is_empty() {
            return Err(InventoryError::InvalidName("group name cannot be empty".into()));
        }
        if !self.groups.contains_key(name) {
            trace!("Adding group '{}'", name);
            self.groups.insert(name.to_string(), Group::new(name));
            self.closure.clear();
        }
        self.groups
            .get_mut(name)
            .ok_or_else(|| InventoryError::GroupNotFound(name.to_string()))
    }

    /// Add a host, optionally into a group.
    ///
    /// Re-adding an existing host merges group membership.
    pub fn add_host(&mut self, name: &str, group: Option<&str>) -> Result<&mut Host, InventoryError> {
        if name.is_empty() {
            return Err(InventoryError::InvalidName("host name cannot be empty".into()));
        }
        if let Some(group) = group {
            if !self.groups.contains_key(group) {
                return Err(InventoryError::GroupNotFound(group.to_string()));
            }
        }

        if !self.hosts.contains_key(name) {
            trace!("Adding host '{}'", name);
            let mut host = Host::new(name);
            if self.is_localhost_alias(name) {
                if let Some(implicit) = self.implicit_localhost.get() {
                    host.merge_vars(&implicit.vars);
                }
            }
            self.hosts.insert(name.to_string(), host);
        }
        self.closure.clear();

        if let Some(group) = group {
            if group != ALL {
                self.add_host_to_group(group, name)?;
            }
        }
        self.hosts
            .get_mut(name)
            .ok_or_else(|| InventoryError::HostNotFound(name.to_string()))
    }

    /// Make a declared host a direct member of a group
    pub fn add_host_to_group(&mut self, group: &str, host: &str) -> Result<(), InventoryError> {
        let h = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| InventoryError::HostNotFound(host.to_string()))?;
        let g = self
            .groups
            .get_mut(group)
            .ok_or_else(|| InventoryError::GroupNotFound(group.to_string()))?;
        g.add_host(host);
        h.add_group(group);
        self.closure.clear();
        Ok(())
    }

    /// Link `child` under `parent`, rejecting cycles
    pub fn add_child_group(&mut self, parent: &str, child: &str) -> Result<(), InventoryError> {
        if parent == child {
            return Err(InventoryError::CircularDependency(format!(
                "group '{parent}' cannot be its own child"
            )));
        }
        if !self.groups.contains_key(parent) {
            return Err(InventoryError::GroupNotFound(parent.to_string()));
        }
        if !self.groups.contains_key(child) {
            return Err(InventoryError::GroupNotFound(child.to_string()));
        }
        if self.is_descendant(child, parent) {
            return Err(InventoryError::CircularDependency(format!(
                "adding '{child}' under '{parent}' would create a cycle"
            )));
        }

        if let Some(g) = self.groups.get_mut(parent) {
            g.add_child(child);
        }
        if let Some(g) = self.groups.get_mut(child) {
            g.parents.insert(parent.to_string());
        }
        self.closure.clear();
        Ok(())
    }

    /// Whether `candidate` is reachable below `root`
    fn is_descendant(&self, root: &str, candidate: &str) -> bool {
        let mut stack = vec![root];
        let mut seen = HashSet::new();
        while let Some(name) = stack.pop() {
            if name == candidate {
                return true;
            }
            if !seen.insert(name) {
                continue;
            }
            if let Some(group) = self.groups.get(name) {
                stack.extend(group.children.iter().map(String::as_str));
            }
        }
        false
    }

    /// Remove a host from the store and every group
    pub fn remove_host(&mut self, name: &str) -> Option<Host> {
        let host = self.hosts.shift_remove(name)?;
        for group in self.groups.values_mut() {
            group.remove_host(name);
        }
        self.closure.clear();
        Some(host)
    }

    /// Remove a group, unlinking it from parents and children.
    ///
    /// The structural groups cannot be removed.
    pub fn remove_group(&mut self, name: &str) -> Result<Option<Group>, InventoryError> {
        if name == ALL || name == UNGROUPED {
            return Err(InventoryError::InvalidName(format!(
                "cannot remove structural group '{name}'"
            )));
        }
        let Some(group) = self.groups.shift_remove(name) else {
            return Ok(None);
        };
        for other in self.groups.values_mut() {
            other.remove_child(name);
            other.parents.shift_remove(name);
        }
        for host in self.hosts.values_mut() {
            host.remove_group(name);
        }
        self.closure.clear();
        Ok(Some(group))
    }

    /// Set a variable on a host or group
    pub fn set_variable(&mut self, entity: &str, key: &str, value: JsonValue) -> Result<(), InventoryError> {
        if let Some(group) = self.groups.get_mut(entity) {
            group.set_var(key, value);
        } else if let Some(host) = self.hosts.get_mut(entity) {
            host.set_var(key, value);
        } else {
            return Err(InventoryError::HostNotFound(entity.to_string()));
        }
        Ok(())
    }

    /// Hosts of a group including those of child groups.
    ///
    /// Child groups come first (depth-first, insertion order), then direct
    /// members; duplicates keep their first position.
    pub fn get_hosts_for_group(&self, name: &str) -> Vec<String> {
        if let Some(cached) = self.closure.get(name) {
            return cached.clone();
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_group_hosts(name, &mut seen, &mut out, &mut HashSet::new());
        out
    }

    fn collect_group_hosts<'a>(
        &'a self,
        name: &'a str,
        seen: &mut HashSet<&'a str>,
        out: &mut Vec<String>,
        visiting: &mut HashSet<&'a str>,
    ) {
        let Some(group) = self.groups.get(name) else {
            return;
        };
        if !visiting.insert(name) {
            return;
        }
        for child in &group.children {
            self.collect_group_hosts(child, seen, out, visiting);
        }
        for host in &group.hosts {
            if seen.insert(host.as_str()) {
                out.push(host.clone());
            }
        }
    }

    /// Every ancestor group of a host, nearest first, ending with `all`
    pub fn host_groups(&self, host: &str) -> IndexSet<String> {
        let mut out = IndexSet::new();
        let Some(h) = self.hosts.get(host) else {
            return out;
        };
        let mut frontier: Vec<String> = h.groups.iter().cloned().collect();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for name in frontier {
                if out.insert(name.clone()) {
                    if let Some(group) = self.groups.get(&name) {
                        next.extend(group.parents.iter().cloned());
                    }
                }
            }
            frontier = next;
        }
        out.shift_remove(ALL);
        out.insert(ALL.to_string());
        out
    }

    /// Variables a host inherits from its groups and itself.
    ///
    /// `all` is applied first, then groups from farthest to nearest, then
    /// the host's own variables.
    pub fn host_vars(&self, host: &str) -> IndexMap<String, JsonValue> {
        let mut vars = IndexMap::new();
        let Some(h) = self.get_host(host) else {
            return vars;
        };
        if !h.implicit {
            let groups = self.host_groups(host);
            for name in groups.iter().rev() {
                if let Some(group) = self.groups.get(name) {
                    vars.extend(group.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        } else if let Some(all) = self.groups.get(ALL) {
            vars.extend(all.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        vars.extend(h.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// Restore structural invariants after a batch of mutations.
    pub fn reconcile(&mut self) {
        debug!("Reconciling inventory");

        let orphans: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.name != ALL && g.parents.is_empty())
            .map(|g| g.name.clone())
            .collect();
        for name in orphans {
            if let Some(all) = self.groups.get_mut(ALL) {
                all.add_child(name.clone());
            }
            if let Some(group) = self.groups.get_mut(&name) {
                group.parents.insert(ALL.to_string());
            }
        }

        let mut join_ungrouped = Vec::new();
        let mut leave_ungrouped = Vec::new();
        for host in self.hosts.values() {
            let explicit = host
                .groups
                .iter()
                .any(|g| g != ALL && g != UNGROUPED);
            if explicit && host.in_group(UNGROUPED) {
                leave_ungrouped.push(host.name.clone());
            } else if !explicit && !host.implicit && !host.in_group(UNGROUPED) {
                join_ungrouped.push(host.name.clone());
            }
        }
        for name in leave_ungrouped {
            if let Some(host) = self.hosts.get_mut(&name) {
                host.remove_group(UNGROUPED);
            }
            if let Some(group) = self.groups.get_mut(UNGROUPED) {
                group.remove_host(&name);
            }
        }
        for name in join_ungrouped {
            if let Some(host) = self.hosts.get_mut(&name) {
                host.remove_group(ALL);
                host.add_group(UNGROUPED);
            }
            if let Some(group) = self.groups.get_mut(ALL) {
                group.remove_host(&name);
            }
            if let Some(group) = self.groups.get_mut(UNGROUPED) {
                group.add_host(name);
            }
        }

        let mut closure = HashMap::with_capacity(self.groups.len());
        for name in self.groups.keys() {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            self.collect_group_hosts(name, &mut seen, &mut out, &mut HashSet::new());
            closure.insert(name.clone(), out);
        }
        self.closure = closure;
    }
}
