//! Inventory store and host-pattern resolver.
//!
//! This module provides:
//! - The host/group graph with variable inheritance ([`InventoryData`])
//! - Source plugins for host lists, scripts, YAML and INI files
//! - The pattern language (`web:&prod:!db1`, globs, `~regex`, `[a:b]`)
//! - [`InventoryManager`], which ties sources, limits and restrictions together
//!
//! # Example
//!
//! ```rust,ignore
//! use armada::inventory::{InventoryManager, HostOrder};
//!
//! let hosts = manager.get_hosts("webservers:&prod:!web3", false, false, Some(HostOrder::Sorted))?;
//! ```

pub mod address;
pub mod data;
pub mod group;
pub mod host;
pub mod manager;
pub mod pattern;
pub mod plugins;
pub mod resolver;

pub use data::{InventoryData, LOCALHOST_ALIASES};
pub use group::{Group, ALL, UNGROUPED};
pub use host::Host;
pub use manager::InventoryManager;
pub use pattern::{split_host_pattern, PatternInput};
pub use plugins::{InventoryPlugin, InventoryPluginRegistry};
pub use resolver::{HostOrder, PatternResolver};

use thiserror::Error;

/// Errors raised by inventory graph mutations and source plugins
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid inventory name: {0}")]
    InvalidName(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("circular group dependency detected: {0}")]
    CircularDependency(String),

    #[error("dynamic inventory script failed: {0}")]
    DynamicInventoryFailed(String),

    #[error("invalid INI format: {0}")]
    InvalidIniFormat(String),
}
