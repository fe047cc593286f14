//! Basic fact gathering.

use async_trait::async_trait;
use globset::Glob;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use super::{arg_str, Action, ActionContext, ActionError, ActionResult};

const FACT_COMMANDS: &str = "uname -s; uname -r; uname -m; uname -n; id -un; pwd";

const FACT_NAMES: [&str; 6] = [
    "ansible_system",
    "ansible_kernel",
    "ansible_architecture",
    "ansible_nodename",
    "ansible_user_id",
    "ansible_user_dir",
];

#[derive(Debug, Clone, Copy)]
pub struct SetupAction;

#[async_trait]
impl Action for SetupAction {
    fn name(&self) -> &'static str {
        "setup"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["gather_facts"]
    }

    async fn run(&self, args: &JsonMap<String, JsonValue>, ctx: &ActionContext) -> ActionResult {
        let conn = ctx.connection()?;
        let output = conn.exec_command(FACT_COMMANDS, None).await?;
        if !output.success {
            return Err(ActionError::Failed(format!(
                "fact commands exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let mut facts = JsonMap::new();
        for (name, value) in FACT_NAMES.iter().zip(output.stdout.lines()) {
            facts.insert(name.to_string(), JsonValue::from(value.trim()));
        }
        if let Some(nodename) = facts.get("ansible_nodename").and_then(JsonValue::as_str) {
            let short = nodename.split('.').next().unwrap_or(nodename).to_string();
            facts.insert("ansible_hostname".into(), JsonValue::from(short));
        }

        if let Some(filter) = arg_str(args, "filter") {
            let matcher = Glob::new(filter)
                .map_err(|e| ActionError::InvalidParameter(format!("filter: {}", e)))?
                .compile_matcher();
            facts.retain(|key, _| matcher.is_match(key));
        }

        Ok(json!({"changed": false, "ansible_facts": facts}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests::local_context;
    use crate::template::Vars;

    #[tokio::test]
    async fn test_setup_gathers_local_facts() {
        let ctx = local_context(Vars::new());
        let out = SetupAction.run(&JsonMap::new(), &ctx).await.unwrap();
        let facts = out["ansible_facts"].as_object().unwrap();
        assert!(facts.contains_key("ansible_system"));
        assert!(facts.contains_key("ansible_hostname"));
    }

    #[tokio::test]
    async fn test_setup_filter() {
        let ctx = local_context(Vars::new());
        let args: JsonMap<String, JsonValue> =
            serde_json::from_value(json!({"filter": "ansible_kernel"})).unwrap();
        let out = SetupAction.run(&args, &ctx).await.unwrap();
        let facts = out["ansible_facts"].as_object().unwrap();
        assert_eq!(facts.len(), 1);
        assert!(facts.contains_key("ansible_kernel"));
    }
}
