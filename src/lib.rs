//! # Armada - Inventory and Play Execution Core
//!
//! Armada resolves host patterns against an inventory and runs plays over
//! the selected hosts with a bounded pool of async workers. It follows the
//! Ansible execution model: blocks with rescue and always sections, handlers
//! that run at flush points, serial batches, `run_once`, and the linear and
//! free strategies.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts organized into a group hierarchy with variables
//! - **Patterns**: `web:&prod:!web3`, globs, `~regex` and `[1:3]` subscripts
//! - **Plays**: one pass of blocks over the hosts a pattern selects
//! - **Strategies**: how (host, task) units are scheduled onto workers
//! - **Handlers**: tasks that run only when notified, once per host per flush
//! - **Callbacks**: fire-and-forget observers of execution events
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        PlaybookExecutor                              │
//! │          (serial batches, strategy registry, run status)             │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Inventory    │   │   Strategy driver   │   │   Result reader     │
//! │ (store, pattern │   │  (linear / free +   │──▶│  (mpsc channel ->   │
//! │   resolver)     │   │   handler ledger)   │   │   buffer + Notify)  │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                    │                         ▲
//!                                    ▼                         │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 Worker pool (one tokio task per unit)                │
//! │           actions, templating, connections, fact gathering           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use armada::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::default();
//!     let mut inventory = InventoryManager::new(config.inventory.clone(), Arc::new(YamlLoader::new(".")))?;
//!     inventory.parse_sources()?;
//!
//!     let play = Play::new("ping all", "web:!web3")
//!         .with_tasks(vec![Task::new("ping", Default::default())]);
//!
//!     let callbacks = CallbackManager::new(vec![Arc::new(DefaultCallback::new(0))]);
//!     let mut executor = PlaybookExecutor::new(config, inventory, callbacks)?;
//!     let status = executor.run_playbook(&[play]).await?;
//!     std::process::exit(status.code());
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.
    //!
    //! - **Inventory**: store, manager, hosts, groups, ordering
    //! - **Execution**: executor, strategies, results and statistics
    //! - **Collaborators**: templating, actions, connections, fact caches
    //! - **Callbacks**: event types and the built-in plugins
    //! - **Errors**: error handling types

    pub use std::sync::Arc;

    // Error handling
    pub use crate::error::{Error, Result};

    // Configuration
    pub use crate::config::Config;

    // Inventory
    pub use crate::inventory::{Group, Host, HostOrder, InventoryData, InventoryManager};

    // Execution engine
    pub use crate::executor::{
        AggregateStats, ExecutionContext, PlaybookExecutor, RunStatus, TaskResult,
    };

    // Playbooks
    pub use crate::loader::{Loader, YamlLoader};
    pub use crate::playbook::{Block, Play, PlaySource, Task};

    // Collaborators
    pub use crate::cache::{FactCache, FactCacheRegistry};
    pub use crate::connection::{Connection, ConnectionRegistry};
    pub use crate::modules::{ActionDispatcher, ActionRegistry};
    pub use crate::template::{JinjaTemplar, Templar, Vars};
    pub use crate::vars::VariableManager;

    // Callbacks
    pub use crate::callback::{
        CallbackEvent, CallbackManager, CallbackPlugin, DefaultCallback, NullCallback,
    };
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Armada operations.
///
/// This module provides the main [`Error`](error::Error) enum covering
/// pattern parse errors, inventory source failures, handler lookup misses,
/// worker death and collaborator failures.
pub mod error;

/// Configuration loading and merging.
pub mod config;

/// Variable management and precedence handling.
///
/// Merges inventory variables, cached facts, play and task variables,
/// run-scoped facts, extra variables and magic variables for one host.
pub mod vars;

// ============================================================================
// Inventory
// ============================================================================

/// Host and group inventory management.
///
/// The inventory store holds hosts, groups and their variables; the
/// pattern resolver turns host patterns into ordered host lists; inventory
/// plugins populate the store from sources.
pub mod inventory;

// ============================================================================
// Playbook Components
// ============================================================================

/// File loading for playbooks and inventory sources.
pub mod loader;

/// Play, block and task definitions and their compilation from YAML.
pub mod playbook;

/// Handler notification ledger.
///
/// Handlers are special tasks that only run when notified by other tasks.
/// They run at most once per host per flush, in declaration order.
pub mod handlers;

// ============================================================================
// Execution Engine
// ============================================================================

/// Play execution: strategies, worker pool, result aggregation.
///
/// [`PlaybookExecutor`](executor::PlaybookExecutor) runs plays batch by
/// batch; the linear strategy moves hosts in lockstep, the free strategy
/// lets each host advance on its own.
///
/// # Example
///
/// ```rust,ignore
/// use armada::executor::PlaybookExecutor;
///
/// let mut executor = PlaybookExecutor::new(config, inventory, callbacks)?;
/// let status = executor.run(&play).await?;
/// assert!(status.is_ok());
/// ```
pub mod executor;

// ============================================================================
// Collaborators
// ============================================================================

/// Connection layer for executing commands on hosts.
pub mod connection;

/// Actions (modules) dispatched by workers.
pub mod modules;

/// Jinja2-compatible templating via minijinja.
pub mod template;

/// Fact cache backends.
pub mod cache;

// ============================================================================
// Output
// ============================================================================

/// Callback plugins receiving execution events.
pub mod callback;

/// Command-line interface.
pub mod cli;

/// Returns the current version of Armada.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns detailed version information including build metadata.
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
        target: std::env::consts::ARCH,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Detailed version information for the Armada build.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Semantic version string
    pub version: &'static str,
    /// Minimum Rust version required
    pub rust_version: &'static str,
    /// Target architecture
    pub target: &'static str,
    /// Build profile (debug or release)
    pub profile: &'static str,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "armada {} ({}, {})",
            self.version, self.target, self.profile
        )
    }
}
