//! Command execution on the target host.
//!
//! `command` runs its arguments without shell interpretation (each word is
//! quoted before reaching the transport); `shell` passes the string through
//! unchanged.

use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::{arg_str, Action, ActionContext, ActionError, ActionResult};
use crate::connection::{Connection, ExecuteOptions};

#[derive(Debug, Clone, Copy)]
pub struct CommandAction;

#[derive(Debug, Clone, Copy)]
pub struct ShellAction;

fn command_line(args: &JsonMap<String, JsonValue>, use_shell: bool) -> Result<String, ActionError> {
    if let Some(JsonValue::Array(argv)) = args.get("argv") {
        let words: Vec<String> = argv
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        return Ok(shell_words::join(words));
    }

    let raw = arg_str(args, "_raw_params")
        .or_else(|| arg_str(args, "cmd"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ActionError::MissingParameter("no command given".into()))?;

    if use_shell {
        return Ok(raw.to_string());
    }
    let words = shell_words::split(raw)
        .map_err(|e| ActionError::InvalidParameter(format!("cannot parse command: {}", e)))?;
    Ok(shell_words::join(words))
}

async fn path_exists(conn: &dyn Connection, path: &str) -> Result<bool, ActionError> {
    let test = format!("test -e {}", shell_words::quote(path));
    Ok(conn.exec_command(&test, None).await?.success)
}

fn lines(s: &str) -> JsonValue {
    JsonValue::Array(s.lines().map(JsonValue::from).collect())
}

async fn run_command(
    args: &JsonMap<String, JsonValue>,
    ctx: &ActionContext,
    use_shell: bool,
) -> ActionResult {
    let cmd = command_line(args, use_shell)?;
    let conn = ctx.connection()?;

    if let Some(creates) = arg_str(args, "creates") {
        if path_exists(conn.as_ref(), creates).await? {
            return Ok(json!({
                "changed": false,
                "cmd": cmd,
                "rc": 0,
                "stdout": format!("skipped, since {} exists", creates),
                "msg": "Did not run command since a file exists",
            }));
        }
    }
    if let Some(removes) = arg_str(args, "removes") {
        if !path_exists(conn.as_ref(), removes).await? {
            return Ok(json!({
                "changed": false,
                "cmd": cmd,
                "rc": 0,
                "stdout": format!("skipped, since {} does not exist", removes),
                "msg": "Did not run command since a file is missing",
            }));
        }
    }

    let mut options = ExecuteOptions::new();
    if let Some(chdir) = arg_str(args, "chdir") {
        options = options.with_cwd(chdir);
    }

    let start = Local::now();
    let output = conn.exec_command(&cmd, Some(options)).await?;
    let end = Local::now();
    let delta = end - start;

    let stdout = output.stdout.trim_end_matches('\n').to_string();
    let stderr = output.stderr.trim_end_matches('\n').to_string();
    let mut result = json!({
        "changed": true,
        "cmd": cmd,
        "rc": output.exit_code,
        "stdout": stdout,
        "stderr": stderr,
        "stdout_lines": lines(&stdout),
        "stderr_lines": lines(&stderr),
        "start": start.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        "end": end.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        "delta": format!(
            "{}.{:06}",
            delta.num_seconds(),
            delta.num_microseconds().unwrap_or_default() % 1_000_000
        ),
    });
    if output.exit_code != 0 {
        result["failed"] = JsonValue::Bool(true);
        result["msg"] = JsonValue::from("non-zero return code");
    }
    Ok(result)
}

#[async_trait]
impl Action for CommandAction {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult {
        run_command(args, ctx, false).await
    }
}

#[async_trait]
impl Action for ShellAction {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult {
        run_command(args, ctx, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests::local_context;
    use crate::template::Vars;

    fn args(value: JsonValue) -> JsonMap<String, JsonValue> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_command_line_quoting() {
        let cmd = command_line(&args(json!({"_raw_params": "echo 'a b' $HOME"})), false).unwrap();
        assert_eq!(cmd, "echo 'a b' '$HOME'");

        let cmd = command_line(&args(json!({"_raw_params": "echo $HOME"})), true).unwrap();
        assert_eq!(cmd, "echo $HOME");

        let cmd = command_line(&args(json!({"argv": ["ls", "-l", "my dir"]})), false).unwrap();
        assert_eq!(cmd, "ls -l 'my dir'");

        assert!(command_line(&JsonMap::new(), false).is_err());
    }

    #[tokio::test]
    async fn test_shell_runs_locally() {
        let ctx = local_context(Vars::new());
        let out = ShellAction
            .run(&args(json!({"_raw_params": "echo one; echo two"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["rc"], json!(0));
        assert_eq!(out["stdout_lines"], json!(["one", "two"]));
        assert_eq!(out["changed"], json!(true));
    }

    #[tokio::test]
    async fn test_command_nonzero_rc_fails() {
        let ctx = local_context(Vars::new());
        let out = ShellAction
            .run(&args(json!({"_raw_params": "exit 3"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["rc"], json!(3));
        assert_eq!(out["failed"], json!(true));
    }

    #[tokio::test]
    async fn test_creates_skips() {
        let ctx = local_context(Vars::new());
        let out = CommandAction
            .run(&args(json!({"_raw_params": "false", "creates": "/"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["changed"], json!(false));
        assert!(out.get("failed").is_none());
    }
}
