//! Actions that run entirely on the control node.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::{arg_bool, arg_str, Action, ActionContext, ActionError, ActionResult};

static VALID_VAR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid variable name regex"));

fn check_var_name(name: &str) -> Result<(), ActionError> {
    if VALID_VAR_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ActionError::InvalidParameter(format!(
            "The variable name '{}' is not valid. Variables must start with a letter or underscore character, and contain only letters, numbers and underscores.",
            name
        )))
    }
}

/// Connectivity check
#[derive(Debug, Clone, Copy)]
pub struct PingAction;

#[async_trait]
impl Action for PingAction {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult {
        ctx.connection()?;
        let data = arg_str(args, "data").unwrap_or("pong");
        if data == "crash" {
            return Err(ActionError::Failed("boom".into()));
        }
        Ok(json!({"changed": false, "ping": data}))
    }
}

/// Print a message or a variable
#[derive(Debug, Clone, Copy)]
pub struct DebugAction;

#[async_trait]
impl Action for DebugAction {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult {
        if args.contains_key("msg") && args.contains_key("var") {
            return Err(ActionError::InvalidParameter(
                "'msg' and 'var' are incompatible options".into(),
            ));
        }

        if let Some(var) = arg_str(args, "var") {
            let expr = JsonValue::String(format!("{{{{ {} }}}}", var));
            let value = match ctx.templar.render_value(&expr, &ctx.vars) {
                Ok(value) => value,
                Err(_) => JsonValue::from("VARIABLE IS NOT DEFINED!"),
            };
            let mut out = JsonMap::new();
            out.insert(var.to_string(), value);
            out.insert("changed".into(), JsonValue::Bool(false));
            return Ok(JsonValue::Object(out));
        }

        let msg = args
            .get("msg")
            .cloned()
            .unwrap_or_else(|| JsonValue::from("Hello world!"));
        Ok(json!({"changed": false, "msg": msg}))
    }
}

/// Set host variables; `cacheable` makes them persistent facts
#[derive(Debug, Clone, Copy)]
pub struct SetFactAction;

#[async_trait]
impl Action for SetFactAction {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, _ctx: &ActionContext) -> ActionResult {
        let cacheable = arg_bool(args, "cacheable", false);
        let mut facts = JsonMap::new();
        for (key, value) in args {
            if key == "cacheable" {
                continue;
            }
            check_var_name(key)?;
            facts.insert(key.clone(), value.clone());
        }
        if facts.is_empty() {
            return Err(ActionError::MissingParameter(
                "No key/value pairs provided, at least one is required for this action to succeed".into(),
            ));
        }
        Ok(json!({
            "changed": false,
            "ansible_facts": facts,
            "_ansible_facts_cacheable": cacheable,
        }))
    }
}

/// Record custom run statistics
#[derive(Debug, Clone, Copy)]
pub struct SetStatsAction;

#[async_trait]
impl Action for SetStatsAction {
    fn name(&self) -> &'static str {
        "set_stats"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, _ctx: &ActionContext) -> ActionResult {
        let data = match args.get("data") {
            Some(JsonValue::Object(data)) => data.clone(),
            Some(_) => {
                return Err(ActionError::InvalidParameter(
                    "The 'data' option needs to be a dictionary/hash".into(),
                ))
            }
            None => JsonMap::new(),
        };
        for key in data.keys() {
            check_var_name(key)?;
        }
        Ok(json!({
            "changed": false,
            "ansible_stats": {
                "data": data,
                "per_host": arg_bool(args, "per_host", false),
                "aggregate": arg_bool(args, "aggregate", true),
            },
        }))
    }
}

/// Fail with a message
#[derive(Debug, Clone, Copy)]
pub struct FailAction;

#[async_trait]
impl Action for FailAction {
    fn name(&self) -> &'static str {
        "fail"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, _ctx: &ActionContext) -> ActionResult {
        let msg = args
            .get("msg")
            .cloned()
            .unwrap_or_else(|| JsonValue::from("Failed as requested from task"));
        Ok(json!({"changed": false, "failed": true, "msg": msg}))
    }
}

/// Check that conditionals hold
#[derive(Debug, Clone, Copy)]
pub struct AssertAction;

#[async_trait]
impl Action for AssertAction {
    fn name(&self) -> &'static str {
        "assert"
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult {
        let that: Vec<String> = match args.get("that") {
            Some(JsonValue::String(s)) => vec![s.clone()],
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(JsonValue::Bool(b)) => vec![b.to_string()],
            _ => return Err(ActionError::MissingParameter("that".into())),
        };
        let quiet = arg_bool(args, "quiet", false);

        for assertion in &that {
            if !ctx.templar.evaluate_conditional(assertion, &ctx.vars)? {
                let msg = args
                    .get("fail_msg")
                    .or_else(|| args.get("msg"))
                    .cloned()
                    .unwrap_or_else(|| JsonValue::from("Assertion failed"));
                return Ok(json!({
                    "changed": false,
                    "failed": true,
                    "evaluated_to": false,
                    "assertion": assertion,
                    "msg": msg,
                }));
            }
        }

        let mut result = json!({"changed": false});
        if !quiet {
            result["msg"] = args
                .get("success_msg")
                .cloned()
                .unwrap_or_else(|| JsonValue::from("All assertions passed"));
        }
        Ok(result)
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

    #[tokio::test]
    async fn test_ping() {
        let ctx = local_context(Vars::new());
        let out = PingAction.run(&JsonMap::new(), &ctx).await.unwrap();
        assert_eq!(out["ping"], json!("pong"));
        assert!(PingAction
            .run(&args(json!({"data": "crash"})), &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ping_unreachable_transport() {
        let mut ctx = local_context(Vars::new());
        ctx.vars.insert("ansible_connection".into(), json!("ssh"));
        let err = PingAction.run(&JsonMap::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, ActionError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_debug_var() {
        let mut vars = Vars::new();
        vars.insert("answer".into(), json!(42));
        let ctx = local_context(vars);
        let out = DebugAction
            .run(&args(json!({"var": "answer"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["answer"], json!(42));

        let out = DebugAction
            .run(&args(json!({"var": "missing"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["missing"], json!("VARIABLE IS NOT DEFINED!"));
    }

    #[tokio::test]
    async fn test_set_fact() {
        let ctx = local_context(Vars::new());
        let out = SetFactAction
            .run(&args(json!({"a": 1, "cacheable": "yes"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["ansible_facts"], json!({"a": 1}));
        assert_eq!(out["_ansible_facts_cacheable"], json!(true));

        assert!(SetFactAction
            .run(&args(json!({"bad-name": 1})), &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_set_stats_defaults() {
        let ctx = local_context(Vars::new());
        let out = SetStatsAction
            .run(&args(json!({"data": {"deployed": 1}})), &ctx)
            .await
            .unwrap();
        assert_eq!(
            out["ansible_stats"],
            json!({"data": {"deployed": 1}, "per_host": false, "aggregate": true})
        );
    }

    #[tokio::test]
    async fn test_assert() {
        let mut vars = Vars::new();
        vars.insert("x".into(), json!(3));
        let ctx = local_context(vars);

        let ok = AssertAction
            .run(&args(json!({"that": ["x > 1", "x < 5"]})), &ctx)
            .await
            .unwrap();
        assert_eq!(ok["msg"], json!("All assertions passed"));

        let failed = AssertAction
            .run(&args(json!({"that": "x > 5", "fail_msg": "too small"})), &ctx)
            .await
            .unwrap();
        assert_eq!(failed["failed"], json!(true));
        assert_eq!(failed["assertion"], json!("x > 5"));
        assert_eq!(failed["msg"], json!("too small"));
    }

    #[tokio::test]
    async fn test_fail_default_message() {
        let ctx = local_context(Vars::new());
        let out = FailAction.run(&JsonMap::new(), &ctx).await.unwrap();
        assert_eq!(out["msg"], json!("Failed as requested from task"));
        assert_eq!(out["failed"], json!(true));
    }
}
