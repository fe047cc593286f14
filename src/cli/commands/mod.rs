//! Subcommands module for Armada CLI
//!
//! This module contains all the subcommand implementations.

pub mod inventory;
pub mod run;

use crate::cli::output::OutputFormatter;
use crate::config::Config;
use crate::inventory::InventoryManager;
use crate::loader::YamlLoader;
use crate::template::Vars;
use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Common context shared between commands
#[derive(Debug)]
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Inventory sources given on the command line
    pub inventory_sources: Vec<String>,
    /// Extra variables
    pub extra_vars: Vec<String>,
    /// Verbosity level
    pub verbosity: u8,
    /// Limit pattern
    pub limit: Option<String>,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self {
            config,
            output,
            inventory_sources: cli.inventory.clone(),
            extra_vars: cli.extra_vars.clone(),
            verbosity: cli.verbosity(),
            limit: cli.limit.clone(),
        }
    }

    /// Effective inventory sources: the command line wins over configuration
    pub fn sources(&self) -> Vec<String> {
        if self.inventory_sources.is_empty() {
            self.config.inventory.sources.clone()
        } else {
            self.inventory_sources.clone()
        }
    }

    /// Parse the inventory sources and apply `--limit`
    pub fn load_inventory(&self) -> Result<InventoryManager> {
        let mut inventory_config = self.config.inventory.clone();
        inventory_config.sources = self.sources();

        let loader = Arc::new(YamlLoader::new(std::env::current_dir()?));
        let mut inventory = InventoryManager::new(inventory_config, loader)
            .context("Failed to set up inventory plugins")?;
        inventory
            .parse_sources()
            .context("Failed to parse inventory")?;
        inventory
            .subset(self.limit.as_deref())
            .context("Invalid --limit pattern")?;
        Ok(inventory)
    }

    /// Parse extra variables (`key=value` or `@file`)
    pub fn parse_extra_vars(&self) -> Result<Vars> {
        let mut vars = Vars::new();

        for var in &self.extra_vars {
            if let Some(file_path) = var.strip_prefix('@') {
                // Load from file
                let content = std::fs::read_to_string(file_path)
                    .with_context(|| format!("Failed to read extra vars file: {}", file_path))?;
                let file_vars: Vars = serde_yaml::from_str(&content)
                    .with_context(|| format!("Extra vars file is not a mapping: {}", file_path))?;
                vars.extend(file_vars);
            } else if let Some((key, value)) = var.split_once('=') {
                // Parse key=value
                let parsed_value: JsonValue = serde_yaml::from_str(value)
                    .unwrap_or_else(|_| JsonValue::String(value.to_string()));
                vars.insert(key.to_string(), parsed_value);
            } else {
                anyhow::bail!("Extra vars must be key=value or @file: {}", var);
            }
        }

        Ok(vars)
    }
}
