//! Execution of one (host, task) unit of work.
//!
//! A worker gets a snapshot of the task variables and never touches the
//! inventory or variable manager: every side effect travels back as data in
//! the result. Loops, `until` retries and the `when` / `changed_when` /
//! `failed_when` conditionals are handled here; the action itself is
//! delegated to the [`ActionDispatcher`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tracing::{debug, trace};

use super::results::{PartialKind, ResultMessage, ResultSender};
use super::task_result::{strip_internal_keys, TaskResult};
use crate::connection::ConnectionRegistry;
use crate::modules::{ActionContext, ActionDispatcher};
use crate::playbook::Task;
use crate::template::{Templar, Vars};

/// `until` attempts when the task does not set `retries`
pub const DEFAULT_UNTIL_ATTEMPTS: u32 = 3;

/// One unit of work
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub host: String,
    pub task: Arc<Task>,
    pub vars: Vars,
}

/// Collaborators shared by every worker
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub templar: Arc<dyn Templar>,
    pub actions: Arc<dyn ActionDispatcher>,
    pub connections: Arc<ConnectionRegistry>,
}

fn failed(msg: impl Into<String>) -> JsonValue {
    json!({"failed": true, "changed": false, "msg": msg.into()})
}

fn flag(value: &JsonValue, key: &str) -> bool {
    value.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
}

fn set(value: &mut JsonValue, key: &str, v: JsonValue) {
    if let JsonValue::Object(map) = value {
        map.insert(key.to_string(), v);
    }
}

/// Run a unit of work, reporting partial results on `results`
pub async fn execute(item: &WorkItem, ctx: &WorkerContext, results: &ResultSender) -> TaskResult {
    let task = &item.task;
    debug!(host = %item.host, task = %task.display_name(), "Executing task");

    let mut raw = match &task.loop_items {
        Some(items) => run_loop(item, items, ctx, results).await,
        None => run_once(item, &item.vars, ctx, results).await,
    };

    if !task.notify.is_empty() {
        set(&mut raw, "_ansible_notify", json!(task.notify));
    }
    if task.no_log {
        set(&mut raw, "_ansible_no_log", JsonValue::Bool(true));
    }
    TaskResult::new(item.host.clone(), Arc::clone(task), raw)
}

async fn run_loop(
    item: &WorkItem,
    items: &JsonValue,
    ctx: &WorkerContext,
    results: &ResultSender,
) -> JsonValue {
    let task = &item.task;
    let items = match ctx.templar.render_value(items, &item.vars) {
        Ok(JsonValue::Array(items)) => items,
        Ok(other) => {
            return failed(format!(
                "Invalid data passed to 'loop', it requires a list, got this instead: {}",
                other
            ))
        }
        Err(e) => return failed(e.to_string()),
    };

    if items.is_empty() {
        return json!({
            "changed": false,
            "skipped": true,
            "skipped_reason": "No items in the list",
            "results": [],
        });
    }

    let mut collected = Vec::with_capacity(items.len());
    let mut any_failed = false;
    for loop_item in items {
        let mut vars = item.vars.clone();
        vars.insert(task.loop_var.clone(), loop_item.clone());
        vars.insert("ansible_loop_var".into(), JsonValue::from(task.loop_var.clone()));

        let mut raw = run_once(item, &vars, ctx, results).await;
        set(&mut raw, &task.loop_var, loop_item);
        set(&mut raw, "ansible_loop_var", JsonValue::from(task.loop_var.clone()));
        if task.no_log {
            set(&mut raw, "_ansible_no_log", JsonValue::Bool(true));
        }

        let partial = TaskResult::new(item.host.clone(), Arc::clone(task), raw.clone());
        any_failed |= partial.is_failed();
        let _ = results.send(ResultMessage::Partial {
            kind: PartialKind::Item,
            result: partial,
        });
        collected.push(raw);
    }

    let msg = if any_failed {
        "One or more items failed"
    } else {
        "All items completed"
    };
    json!({"results": collected, "msg": msg})
}

/// One evaluation of the task: conditionals, argument rendering, retries
async fn run_once(
    item: &WorkItem,
    vars: &Vars,
    ctx: &WorkerContext,
    results: &ResultSender,
) -> JsonValue {
    let task = &item.task;

    match ctx.templar.evaluate_all(&task.when, vars) {
        Ok(true) => {}
        Ok(false) => {
            let false_condition = task.when.last().cloned().unwrap_or_default();
            return json!({
                "changed": false,
                "skipped": true,
                "skip_reason": "Conditional result was False",
                "false_condition": false_condition,
            });
        }
        Err(e) => return failed(format!("The conditional check failed: {}", e)),
    }

    let args = match ctx.templar.render_value(&JsonValue::Object(task.args.clone()), vars) {
        Ok(JsonValue::Object(args)) => args,
        Ok(_) => JsonMap::new(),
        Err(e) => return failed(e.to_string()),
    };

    let action_ctx = ActionContext {
        host: item.host.clone(),
        vars: vars.clone(),
        templar: Arc::clone(&ctx.templar),
        connections: Arc::clone(&ctx.connections),
    };

    let Some(until) = &task.until else {
        let mut raw = dispatch(task, &args, &action_ctx, ctx).await;
        if !flag(&raw, "unreachable") {
            apply_result_conditionals(task, &mut raw, vars, ctx);
        }
        return raw;
    };

    // `retries` counts attempts after the first one
    let attempts = match task.retries {
        None => DEFAULT_UNTIL_ATTEMPTS,
        Some(0) => 1,
        Some(n) => n + 1,
    };
    let mut attempt = 1;
    loop {
        let mut raw = dispatch(task, &args, &action_ctx, ctx).await;
        set(&mut raw, "attempts", JsonValue::from(attempt));
        if flag(&raw, "unreachable") {
            return raw;
        }
        apply_result_conditionals(task, &mut raw, vars, ctx);

        let scoped = scoped_vars(task, vars, &raw);
        let done = match ctx.templar.evaluate_conditional(until, &scoped) {
            Ok(done) => done,
            Err(e) => return failed(format!("The conditional check '{}' failed: {}", until, e)),
        };
        if done {
            return raw;
        }
        if attempt >= attempts {
            set(&mut raw, "failed", JsonValue::Bool(true));
            if raw.get("failed_when_result").is_some() {
                set(&mut raw, "failed_when_result", JsonValue::Bool(true));
            }
            return raw;
        }

        set(&mut raw, "retries", JsonValue::from(attempts));
        set(&mut raw, "_ansible_retry", JsonValue::Bool(true));
        trace!(host = %item.host, attempt, "Retrying task");
        let _ = results.send(ResultMessage::Partial {
            kind: PartialKind::Retry,
            result: TaskResult::new(item.host.clone(), Arc::clone(task), raw),
        });
        if task.delay > 0 {
            tokio::time::sleep(Duration::from_secs(task.delay)).await;
        }
        attempt += 1;
    }
}

async fn dispatch(
    task: &Task,
    args: &JsonMap<String, JsonValue>,
    action_ctx: &ActionContext,
    ctx: &WorkerContext,
) -> JsonValue {
    match ctx.actions.dispatch(task, args, action_ctx).await {
        JsonValue::Object(map) => JsonValue::Object(map),
        JsonValue::Null => json!({}),
        other => json!({ "msg": other }),
    }
}

/// Task variables plus the result under the `register` name
fn scoped_vars(task: &Task, vars: &Vars, raw: &JsonValue) -> Vars {
    let mut scoped = vars.clone();
    if let Some(register) = &task.register {
        let mut registered = raw.clone();
        strip_internal_keys(&mut registered);
        scoped.insert(register.clone(), registered);
    }
    scoped
}

/// Apply `changed_when` and `failed_when`
fn apply_result_conditionals(task: &Task, raw: &mut JsonValue, vars: &Vars, ctx: &WorkerContext) {
    if task.changed_when.is_none() && task.failed_when.is_none() {
        return;
    }
    let scoped = scoped_vars(task, vars, raw);

    if let Some(cond) = &task.changed_when {
        match ctx.templar.evaluate_conditional(cond, &scoped) {
            Ok(changed) => set(raw, "changed", JsonValue::Bool(changed)),
            Err(e) => {
                set(raw, "failed", JsonValue::Bool(true));
                set(raw, "msg", JsonValue::from(e.to_string()));
                return;
            }
        }
    }
    if let Some(cond) = &task.failed_when {
        match ctx.templar.evaluate_conditional(cond, &scoped) {
            Ok(failed) => {
                set(raw, "failed_when_result", JsonValue::Bool(failed));
                set(raw, "failed", JsonValue::Bool(failed));
            }
            Err(e) => {
                set(raw, "failed", JsonValue::Bool(true));
                set(raw, "msg", JsonValue::from(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ActionRegistry;
    use crate::template::JinjaTemplar;
    use tokio::sync::mpsc;

    fn context() -> WorkerContext {
        WorkerContext {
            templar: Arc::new(JinjaTemplar::new()),
            actions: Arc::new(ActionRegistry::with_builtins()),
            connections: Arc::new(ConnectionRegistry::default()),
        }
    }

    fn work(task: Task, vars: Vars) -> WorkItem {
        WorkItem {
            host: "localhost".into(),
            task: Arc::new(task),
            vars,
        }
    }

    fn args(value: JsonValue) -> JsonMap<String, JsonValue> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_when_false_skips() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut task = Task::new("debug", args(json!({"msg": "hi"})));
        task.when = vec!["1 == 2".into()];
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;
        assert!(result.is_skipped());
        assert_eq!(result.payload.get("skip_reason"), Some(&json!("Conditional result was False")));
    }

    #[tokio::test]
    async fn test_args_are_rendered() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut vars = Vars::new();
        vars.insert("name".into(), json!("web"));
        let task = Task::new("debug", args(json!({"msg": "hello {{ name }}"})));
        let result = execute(&work(task, vars), &context(), &tx).await;
        assert_eq!(result.msg(), Some("hello web"));
    }

    #[tokio::test]
    async fn test_loop_emits_item_results() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut task = Task::new("debug", args(json!({"msg": "{{ item }}"})));
        task.loop_items = Some(json!(["a", "b"]));
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;

        let items = result.payload.items.as_ref().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("msg"), Some(&json!("b")));
        assert_eq!(result.msg(), Some("All items completed"));

        let mut partials = 0;
        while let Ok(message) = rx.try_recv() {
            assert!(matches!(message, ResultMessage::Partial { kind: PartialKind::Item, .. }));
            partials += 1;
        }
        assert_eq!(partials, 2);
    }

    #[tokio::test]
    async fn test_empty_loop_is_skipped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut task = Task::new("debug", JsonMap::new());
        task.loop_items = Some(json!([]));
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;
        assert!(result.is_skipped());
    }

    #[tokio::test]
    async fn test_until_retries_then_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut task = Task::new("debug", args(json!({"msg": "x"})));
        task.until = Some("false".into());
        task.retries = Some(2);
        task.delay = 0;
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;
        assert!(result.is_failed());
        assert_eq!(result.payload.get("attempts"), Some(&json!(3)));

        let mut retries = 0;
        while let Ok(message) = rx.try_recv() {
            assert!(matches!(message, ResultMessage::Partial { kind: PartialKind::Retry, .. }));
            retries += 1;
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_until_sees_registered_result() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut task = Task::new("debug", args(json!({"msg": "ready"})));
        task.register = Some("out".into());
        task.until = Some("out.msg == 'ready'".into());
        task.delay = 0;
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;
        assert!(!result.is_failed());
        assert_eq!(result.payload.get("attempts"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_changed_and_failed_when() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut task = Task::new("debug", args(json!({"msg": "boom"})));
        task.register = Some("out".into());
        task.changed_when = Some("true".into());
        task.failed_when = Some("'boom' in out.msg".into());
        task.notify = vec!["restart".into()];
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;
        assert!(result.is_changed());
        assert!(result.is_failed());
        assert_eq!(result.payload.failed_when_result, Some(true));
        assert_eq!(result.notified_handlers(), vec!["restart"]);
    }

    #[tokio::test]
    async fn test_unknown_action_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let task = Task::new("no_such_module", JsonMap::new());
        let result = execute(&work(task, Vars::new()), &context(), &tx).await;
        assert!(result.is_failed());
    }
}
