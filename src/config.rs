//! Configuration module for Armada
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/armada/armada.toml)
//! - User configuration (~/.armada.toml)
//! - Project configuration (./armada.toml)
//! - Environment variables
//! - Command-line arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::inventory::LOCALHOST_ALIASES;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler defaults
    pub defaults: Defaults,

    /// Inventory sources and plugins
    pub inventory: InventoryConfig,

    /// Fact cache backend
    pub fact_caching: FactCachingConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Worker pool size
    pub forks: usize,

    /// Default strategy
    pub strategy: String,

    /// Sleep between polls of the worker pool and result buffer
    #[serde(with = "humantime_serde")]
    pub internal_poll_interval: Duration,

    /// Fail the run when a notified handler does not exist
    pub error_on_missing_handler: bool,

    /// Run notified handlers even on failed hosts
    pub force_handlers: bool,

    /// Gather facts implicitly at the start of each play
    pub gathering: bool,

    /// Roles path
    pub roles_path: Vec<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            forks: 5,
            strategy: "linear".to_string(),
            internal_poll_interval: Duration::from_millis(1),
            error_on_missing_handler: true,
            force_handlers: false,
            gathering: true,
            roles_path: vec![PathBuf::from("./roles")],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Source paths, host lists or scripts
    pub sources: Vec<String>,

    /// Plugins tried in order for every source
    pub enabled_plugins: Vec<String>,

    /// Treat a source no plugin can parse as fatal
    pub unparsed_is_failed: bool,

    /// Names that resolve to the implicit localhost
    pub localhost_aliases: Vec<String>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            sources: vec![],
            enabled_plugins: ["host_list", "script", "yaml", "ini"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            unparsed_is_failed: false,
            localhost_aliases: LOCALHOST_ALIASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactCachingConfig {
    /// `memory` or `jsonfile`
    pub backend: String,

    /// Directory for file backed caches
    pub connection: Option<PathBuf>,

    /// Entry lifetime in seconds, 0 never expires
    pub timeout: u64,
}

impl Default for FactCachingConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            connection: None,
            timeout: 86400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        // Load from standard locations
        let config_paths = Self::get_config_paths(config_path);

        for path in config_paths {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        // Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // Explicit path takes priority
        if let Some(path) = explicit_path {
            paths.push(path.clone());
            return paths;
        }

        paths.push(PathBuf::from("/etc/armada/armada.toml"));

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".armada.toml"));
        }

        paths.push(PathBuf::from("armada.toml"));

        if let Ok(env_config) = std::env::var("ARMADA_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        paths
    }

    fn merge_from_file(&self, path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    fn merge(&self, other: Config) -> Config {
        let base = Defaults::default();
        Config {
            defaults: Defaults {
                forks: if other.defaults.forks != base.forks {
                    other.defaults.forks
                } else {
                    self.defaults.forks
                },
                strategy: if other.defaults.strategy != base.strategy {
                    other.defaults.strategy
                } else {
                    self.defaults.strategy.clone()
                },
                internal_poll_interval: if other.defaults.internal_poll_interval
                    != base.internal_poll_interval
                {
                    other.defaults.internal_poll_interval
                } else {
                    self.defaults.internal_poll_interval
                },
                error_on_missing_handler: other.defaults.error_on_missing_handler,
                force_handlers: other.defaults.force_handlers,
                gathering: other.defaults.gathering,
                roles_path: if other.defaults.roles_path == base.roles_path {
                    self.defaults.roles_path.clone()
                } else {
                    other.defaults.roles_path
                },
            },
            inventory: InventoryConfig {
                sources: if other.inventory.sources.is_empty() {
                    self.inventory.sources.clone()
                } else {
                    other.inventory.sources
                },
                enabled_plugins: other.inventory.enabled_plugins,
                unparsed_is_failed: other.inventory.unparsed_is_failed,
                localhost_aliases: other.inventory.localhost_aliases,
            },
            fact_caching: FactCachingConfig {
                connection: other
                    .fact_caching
                    .connection
                    .or_else(|| self.fact_caching.connection.clone()),
                ..other.fact_caching
            },
            logging: other.logging,
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(forks) = std::env::var("ARMADA_FORKS") {
            if let Ok(n) = forks.parse() {
                self.defaults.forks = n;
            }
        }

        if let Ok(strategy) = std::env::var("ARMADA_STRATEGY") {
            self.defaults.strategy = strategy;
        }

        if let Ok(interval) = std::env::var("ARMADA_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.defaults.internal_poll_interval = Duration::from_millis(ms);
            }
        }

        if let Ok(backend) = std::env::var("ARMADA_FACT_CACHE") {
            self.fact_caching.backend = backend;
        }

        if let Ok(timeout) = std::env::var("ARMADA_FACT_CACHE_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.fact_caching.timeout = n;
            }
        }

        if let Ok(value) = std::env::var("ARMADA_ERROR_ON_MISSING_HANDLER") {
            self.defaults.error_on_missing_handler = parse_bool(&value);
        }

        if let Ok(value) = std::env::var("ARMADA_UNPARSED_IS_FAILED") {
            self.inventory.unparsed_is_failed = parse_bool(&value);
        }
    }

    /// Worker pool size, never zero
    pub fn forks(&self) -> usize {
        self.defaults.forks.max(1)
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Config::default().merge_from_file(&path_buf)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
