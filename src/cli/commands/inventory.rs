//! Inventory commands - List hosts and groups
//!
//! This module implements the `hosts` and `groups` subcommands.

use super::CommandContext;
use crate::inventory::HostOrder;
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

/// Arguments for the hosts command
#[derive(Parser, Debug, Clone)]
pub struct HostsArgs {
    /// Host pattern to match
    #[arg(default_value = "all")]
    pub pattern: String,

    /// Host order: inventory, sorted, reverse_sorted, reverse_inventory, shuffle
    #[arg(long)]
    pub order: Option<String>,

    /// Show resolved host variables
    #[arg(long)]
    pub vars: bool,
}

/// Arguments for the groups command
#[derive(Parser, Debug, Clone)]
pub struct GroupsArgs {
    /// Show the hosts of each group
    #[arg(long)]
    pub members: bool,
}

impl HostsArgs {
    /// Execute the hosts command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let order: Option<HostOrder> = self
            .order
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("Invalid --order")?;

        let inventory = ctx.load_inventory()?;
        let hosts = match order {
            Some(order) => inventory.get_host_names(self.pattern.as_str(), false, false, Some(order))?,
            None => inventory.list_hosts(&self.pattern)?,
        };

        if hosts.is_empty() {
            ctx.output
                .warning(&format!("No hosts matched pattern: {}", self.pattern));
        }

        if self.vars {
            let detailed: serde_json::Map<String, serde_json::Value> = hosts
                .iter()
                .map(|host| (host.clone(), json!(inventory.data().host_vars(host))))
                .collect();
            if ctx.output.is_json() {
                ctx.output.json(&serde_json::Value::Object(detailed));
            } else {
                for (host, vars) in &detailed {
                    println!("{}:", host);
                    for line in serde_yaml::to_string(vars)?.lines() {
                        println!("  {}", line);
                    }
                }
            }
        } else {
            ctx.output.hosts(&self.pattern, &hosts);
        }
        ctx.output.flush();
        Ok(0)
    }
}

impl GroupsArgs {
    /// Execute the groups command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx.load_inventory()?;
        let groups = inventory.list_groups();

        if ctx.output.is_json() {
            let document = if self.members {
                let members: serde_json::Map<String, serde_json::Value> = groups
                    .iter()
                    .map(|group| (group.clone(), json!(inventory.data().get_hosts_for_group(group))))
                    .collect();
                serde_json::Value::Object(members)
            } else {
                json!(groups)
            };
            ctx.output.json(&document);
        } else {
            for group in &groups {
                let members = self
                    .members
                    .then(|| inventory.data().get_hosts_for_group(group));
                ctx.output.group(group, members.as_deref());
            }
        }
        ctx.output.flush();
        Ok(0)
    }
}
