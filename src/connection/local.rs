//! Transport for hosts that resolve to the control node
//!
//! Commands go through a shell on this machine and file transfers are plain
//! filesystem copies.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};

const DEFAULT_SHELL: &str = "/bin/sh";

/// Runs work for an inventory host on the control node
#[derive(Debug, Clone)]
pub struct LocalConnection {
    host: String,
    shell: String,
}

impl LocalConnection {
    /// Named after the machine the engine runs on
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".into());
        Self::with_identifier(host)
    }

    /// Named after the inventory host it stands in for
    pub fn with_identifier(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            shell: DEFAULT_SHELL.into(),
        }
    }

    /// Shell used to interpret commands, `ansible_shell_executable` style
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn spawn(&self, command: &str, options: &ExecuteOptions) -> ConnectionResult<tokio::process::Child> {
        let mut process = Command::new(&self.shell);
        process
            .arg("-c")
            .arg(command)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = options.cwd.as_deref() {
            process.current_dir(dir);
        }

        process
            .spawn()
            .map_err(|e| ConnectionError::ExecutionFailed(format!("{}: {e}", self.shell)))
    }

    async fn transfer(from: &Path, to: &Path) -> ConnectionResult<()> {
        let failed = |e: std::io::Error| {
            ConnectionError::TransferFailed(format!("{} -> {}: {e}", from.display(), to.display()))
        };
        if let Some(dir) = to.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(failed)?;
        }
        tokio::fs::copy(from, to).await.map_err(failed)?;
        Ok(())
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn into_result(output: Output) -> CommandResult {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    match output.status.code() {
        Some(0) => CommandResult::success(stdout, stderr),
        // Killed by a signal
        None => CommandResult::failure(-1, stdout, stderr),
        Some(code) => CommandResult::failure(code, stdout, stderr),
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.host
    }

    async fn exec_command(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(host = %self.host, command = %command, "Running on control node");

        let waiting = self.spawn(command, &options)?.wait_with_output();
        let output = match options.timeout {
            None => waiting.await,
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), waiting)
                .await
                .map_err(|_| ConnectionError::Timeout(secs))?,
        }
        .map_err(|e| ConnectionError::ExecutionFailed(e.to_string()))?;

        let result = into_result(output);
        trace!(host = %self.host, rc = result.exit_code, "Command finished");
        Ok(result)
    }

    async fn put_file(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()> {
        trace!(host = %self.host, dest = %remote_path.display(), "put_file");
        Self::transfer(local_path, remote_path).await
    }

    async fn fetch_file(&self, remote_path: &Path, local_path: &Path) -> ConnectionResult<()> {
        trace!(host = %self.host, src = %remote_path.display(), "fetch_file");
        Self::transfer(remote_path, local_path).await
    }

    async fn reset(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_through_the_shell() {
        let conn = LocalConnection::with_identifier("web1");
        let result = conn.exec_command("printf '%s' ok | tr a-z A-Z", None).await.unwrap();

        assert!(result.success);
        assert_eq!(result.stdout, "OK");
        assert_eq!(conn.identifier(), "web1");
    }

    #[tokio::test]
    async fn test_env_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExecuteOptions::new()
            .with_env("ARMADA_MARKER", "present")
            .with_cwd(dir.path().to_string_lossy());
        let result = LocalConnection::new()
            .exec_command("echo $ARMADA_MARKER; ls -a", Some(options))
            .await
            .unwrap();

        assert!(result.stdout.starts_with("present\n"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_result_not_an_error() {
        let result = LocalConnection::new()
            .exec_command("echo broken >&2; exit 42", None)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.stderr.trim(), "broken");
    }

    #[tokio::test]
    async fn test_deadline() {
        let options = ExecuteOptions::new().with_timeout(1);
        let result = LocalConnection::new().exec_command("sleep 10", Some(options)).await;

        assert!(matches!(result, Err(ConnectionError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_missing_shell() {
        let conn = LocalConnection::new().with_shell("/nonexistent/shell");
        assert!(matches!(
            conn.exec_command("true", None).await,
            Err(ConnectionError::ExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("motd");
        std::fs::write(&original, "welcome").unwrap();

        let conn = LocalConnection::new();
        let remote = dir.path().join("etc/motd");
        conn.put_file(&original, &remote).await.unwrap();
        let back = dir.path().join("fetched/motd");
        conn.fetch_file(&remote, &back).await.unwrap();

        assert_eq!(std::fs::read_to_string(back).unwrap(), "welcome");
    }
}
