//! Variable management.
//!
//! [`VariableManager`] assembles the variables a task sees on a host. Layers
//! from lowest to highest precedence:
//!
//! 1. inventory group and host variables
//! 2. facts (fact cache), also exposed as `ansible_facts`
//! 3. play variables
//! 4. task variables
//! 5. non-persistent facts: `set_fact` without `cacheable`, `register`
//! 6. extra variables
//! 7. magic variables (`inventory_hostname`, `groups`, ...)

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::cache::{FactCache, MemoryFactCache};
use crate::error::Result;
use crate::inventory::{InventoryData, ALL, UNGROUPED};
use crate::playbook::{Play, Task};
use crate::template::Vars;

/// Run-time values that depend on the play's progress
#[derive(Debug, Clone, Default)]
pub struct MagicVars {
    /// Hosts still active in the play
    pub play_hosts: Vec<String>,
    /// Hosts that have failed so far
    pub failed_hosts: Vec<String>,
}

/// Owner of facts and run-scoped variables
#[derive(Debug)]
pub struct VariableManager {
    fact_cache: Box<dyn FactCache>,
    nonpersistent: HashMap<String, Vars>,
    extra_vars: Vars,
}

impl Default for VariableManager {
    fn default() -> Self {
        Self::new(Box::new(MemoryFactCache::new(None)))
    }
}

impl VariableManager {
    pub fn new(fact_cache: Box<dyn FactCache>) -> Self {
        Self {
            fact_cache,
            nonpersistent: HashMap::new(),
            extra_vars: IndexMap::new(),
        }
    }

    pub fn with_extra_vars(mut self, extra_vars: Vars) -> Self {
        self.extra_vars = extra_vars;
        self
    }

    pub fn extra_vars(&self) -> &Vars {
        &self.extra_vars
    }

    pub fn fact_cache(&self) -> &dyn FactCache {
        self.fact_cache.as_ref()
    }

    /// Cached facts for a host; a broken cache entry reads as empty
    pub fn facts(&self, host: &str) -> Vars {
        match self.fact_cache.get(host) {
            Ok(facts) => facts.unwrap_or_default(),
            Err(e) => {
                warn!("{}", e);
                Vars::new()
            }
        }
    }

    /// Merge facts that outlive the run
    pub fn set_host_facts(&self, host: &str, facts: Vars) -> Result<()> {
        debug!("Caching {} facts for {}", facts.len(), host);
        self.fact_cache.update(host, facts)
    }

    /// Merge facts that last until the run ends
    pub fn set_nonpersistent_facts(&mut self, host: &str, facts: Vars) {
        self.nonpersistent
            .entry(host.to_string())
            .or_default()
            .extend(facts);
    }

    /// Set one run-scoped variable, as `register` does
    pub fn set_host_variable(&mut self, host: &str, key: impl Into<String>, value: JsonValue) {
        self.nonpersistent
            .entry(host.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn nonpersistent_facts(&self, host: &str) -> Option<&Vars> {
        self.nonpersistent.get(host)
    }

    /// Forget cached and run-scoped facts of a host
    pub fn clear_facts(&mut self, host: &str) -> Result<()> {
        self.nonpersistent.remove(host);
        self.fact_cache.delete(host)
    }

    /// Variables for `task` running on `host`
    pub fn get_vars(
        &self,
        inventory: &InventoryData,
        host: &str,
        play: Option<&Play>,
        task: Option<&Task>,
        magic: &MagicVars,
    ) -> Vars {
        let mut vars = inventory.host_vars(host);

        let facts = self.facts(host);
        if !facts.is_empty() {
            vars.extend(facts.iter().map(|(k, v)| (k.clone(), v.clone())));
            let facts: serde_json::Map<String, JsonValue> = facts.into_iter().collect();
            vars.insert("ansible_facts".into(), JsonValue::Object(facts));
        }

        if let Some(play) = play {
            vars.extend(play.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(task) = task {
            vars.extend(task.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(np) = self.nonpersistent.get(host) {
            vars.extend(np.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        vars.extend(self.extra_vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        vars.extend(magic_vars(inventory, host, play, magic));
        vars
    }
}

fn string_list<'a>(items: impl IntoIterator<Item = &'a String>) -> JsonValue {
    JsonValue::Array(items.into_iter().cloned().map(JsonValue::String).collect())
}

fn magic_vars(inventory: &InventoryData, host: &str, play: Option<&Play>, magic: &MagicVars) -> Vars {
    let mut vars = Vars::new();
    vars.insert("inventory_hostname".into(), JsonValue::from(host));
    let short = host.split('.').next().unwrap_or(host);
    vars.insert("inventory_hostname_short".into(), JsonValue::from(short));

    let mut group_names: Vec<String> = inventory
        .host_groups(host)
        .into_iter()
        .filter(|g| g != ALL && g != UNGROUPED)
        .collect();
    group_names.sort();
    vars.insert("group_names".into(), string_list(&group_names));

    let mut groups = serde_json::Map::new();
    for group in inventory.groups() {
        groups.insert(
            group.name.clone(),
            string_list(&inventory.get_hosts_for_group(&group.name)),
        );
    }
    vars.insert("groups".into(), JsonValue::Object(groups));

    vars.insert("play_hosts".into(), string_list(&magic.play_hosts));
    vars.insert("ansible_play_hosts".into(), string_list(&magic.play_hosts));
    vars.insert("ansible_failed_hosts".into(), string_list(&magic.failed_hosts));
    if let Some(play) = play {
        vars.insert("ansible_play_name".into(), JsonValue::from(play.name.clone()));
    }
    vars
}
