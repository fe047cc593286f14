//! Actions that change the inventory.
//!
//! They only describe the change; the strategy applies it to the store.

use async_trait::async_trait;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::{arg_list, arg_str, Action, ActionContext, ActionError, ActionResult};
use crate::inventory::address::parse_address;

const ADD_HOST_NAME_KEYS: [&str; 3] = ["name", "host", "hostname"];
const ADD_HOST_GROUP_KEYS: [&str; 3] = ["groups", "group", "groupname"];

/// Add a host, and optionally groups, to the in-memory inventory
#[derive(Debug, Clone, Copy)]
pub struct AddHostAction;

#[async_trait]
impl Action for AddHostAction {
    fn name(&self) -> &'static str {
        "add_host"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, _ctx: &ActionContext) -> ActionResult {
        let raw_name = ADD_HOST_NAME_KEYS
            .iter()
            .find_map(|key| arg_str(args, key))
            .ok_or_else(|| ActionError::MissingParameter("name".into()))?;
        let (host_name, port) = parse_address(raw_name, false)
            .map_err(|e| ActionError::InvalidParameter(e.to_string()))?;

        let groups: Vec<String> = ADD_HOST_GROUP_KEYS
            .iter()
            .flat_map(|key| arg_list(args, key))
            .collect();

        let mut host_vars = JsonMap::new();
        for (key, value) in args {
            if ADD_HOST_NAME_KEYS.contains(&key.as_str()) || ADD_HOST_GROUP_KEYS.contains(&key.as_str()) {
                continue;
            }
            host_vars.insert(key.clone(), value.clone());
        }
        if let Some(port) = port {
            host_vars.insert("ansible_port".into(), JsonValue::from(port));
        }

        Ok(json!({
            "changed": false,
            "add_host": {
                "host_name": host_name,
                "groups": groups,
                "host_vars": host_vars,
            },
        }))
    }
}

/// Create a group from a key and put the host in it
#[derive(Debug, Clone, Copy)]
pub struct GroupByAction;

#[async_trait]
impl Action for GroupByAction {
    fn name(&self) -> &'static str {
        "group_by"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, _ctx: &ActionContext) -> ActionResult {
        let key = arg_str(args, "key")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ActionError::MissingParameter("key".into()))?;
        let group = key.replace(' ', "-");

        let mut parents = arg_list(args, "parents");
        if parents.is_empty() {
            parents.push("all".into());
        }
        let parents: Vec<String> = parents.into_iter().map(|p| p.replace(' ', "-")).collect();

        Ok(json!({
            "changed": false,
            "add_group": group,
            "parent_groups": parents,
        }))
    }
}
