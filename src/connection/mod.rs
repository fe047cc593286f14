//! Connection layer for host communication.
//!
//! Actions reach hosts only through the [`Connection`] trait. The engine
//! never retries or times out transport calls itself; a deadline, if any,
//! is an [`ExecuteOptions`] property the transport enforces.
//!
//! # Connection Management
//!
//! [`ConnectionRegistry`] caches one connection per host, creates new ones
//! through a factory chosen from the host's `ansible_connection` variable,
//! and drives `reset_connection`.

/// Local execution connection implementation.
#[cfg(feature = "local")]
pub mod local;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use crate::template::Vars;

#[cfg(feature = "local")]
pub use local::LocalConnection;

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish initial connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download operation failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Connection or operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The requested transport is not available in this build.
    #[error("Unsupported connection type: {0}")]
    UnsupportedTransport(String),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Timeout in seconds (None for no timeout)
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A transport to one host
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Get the connection identifier (usually the host name)
    fn identifier(&self) -> &str;

    /// Execute a command on the host
    async fn exec_command(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Copy a local file to the host
    async fn put_file(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()>;

    /// Copy a file from the host to the control node
    async fn fetch_file(&self, remote_path: &Path, local_path: &Path) -> ConnectionResult<()>;

    /// Drop and re-establish the session
    async fn reset(&self) -> ConnectionResult<()>;
}

/// Creates a connection for a host from its variables
pub type ConnectionFactory =
    Arc<dyn Fn(&str, &Vars) -> ConnectionResult<Arc<dyn Connection>> + Send + Sync>;

/// Transport named by `ansible_connection`, `local` for the implicit localhost
fn transport_for(vars: &Vars) -> String {
    vars.get("ansible_connection")
        .and_then(JsonValue::as_str)
        .unwrap_or("ssh")
        .to_string()
}

/// Built-in factory: only the local transport ships with this crate
pub fn default_factory() -> ConnectionFactory {
    Arc::new(|host: &str, vars: &Vars| {
        let transport = transport_for(vars);
        match transport.as_str() {
            #[cfg(feature = "local")]
            "local" => {
                let mut conn = LocalConnection::with_identifier(host);
                if let Some(shell) = vars.get("ansible_shell_executable").and_then(JsonValue::as_str) {
                    conn = conn.with_shell(shell);
                }
                Ok(Arc::new(conn) as Arc<dyn Connection>)
            }
            other => Err(ConnectionError::UnsupportedTransport(format!(
                "{other} (host {host})"
            ))),
        }
    })
}

/// Per-host connection cache
pub struct ConnectionRegistry {
    factory: ConnectionFactory,
    connections: DashMap<String, Arc<dyn Connection>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(default_factory())
    }
}

impl ConnectionRegistry {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            connections: DashMap::new(),
        }
    }

    /// Cached connection for a host, created on first use
    pub fn get(&self, host: &str, vars: &Vars) -> ConnectionResult<Arc<dyn Connection>> {
        if let Some(conn) = self.connections.get(host) {
            return Ok(Arc::clone(conn.value()));
        }
        let conn = (self.factory)(host, vars)?;
        debug!(host = %host, "Opened connection");
        self.connections.insert(host.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    /// Reset and forget the host's connection; false if none was open
    pub async fn reset(&self, host: &str) -> ConnectionResult<bool> {
        let Some((_, conn)) = self.connections.remove(host) else {
            return Ok(false);
        };
        conn.reset().await?;
        Ok(true)
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_result_constructors() {
        let ok = CommandResult::success("out".into(), String::new());
        assert!(ok.success);
        assert_eq!(ok.exit_code, 0);

        let failed = CommandResult::failure(2, String::new(), "err".into());
        assert!(!failed.success);
        assert_eq!(failed.exit_code, 2);
    }

    #[test]
    fn test_unsupported_transport() {
        let registry = ConnectionRegistry::default();
        let vars = Vars::new();
        assert!(matches!(
            registry.get("web1", &vars),
            Err(ConnectionError::UnsupportedTransport(_))
        ));
        assert!(registry.is_empty());
    }

    #[cfg(feature = "local")]
    #[tokio::test]
    async fn test_registry_caches_and_resets() {
        let registry = ConnectionRegistry::default();
        let mut vars = Vars::new();
        vars.insert("ansible_connection".into(), json!("local"));

        let first = registry.get("localhost", &vars).unwrap();
        let second = registry.get("localhost", &vars).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        assert!(registry.reset("localhost").await.unwrap());
        assert!(!registry.reset("localhost").await.unwrap());
        assert!(registry.is_empty());
    }
}
