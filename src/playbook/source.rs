//! Compiles loader data into [`Play`]s.
//!
//! Handles bare action keys (`command: ls`), `action:` strings and maps,
//! `block/rescue/always`, static `include_tasks`/`import_tasks`, `roles:`
//! and `meta:` tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, trace};

use super::{Block, Play, SerialSpec, Task};
use crate::error::{Error, Result};
use crate::inventory::HostOrder;
use crate::loader::Loader;

const TASK_KEYWORDS: &[&str] = &[
    "name",
    "when",
    "register",
    "notify",
    "loop",
    "with_items",
    "loop_control",
    "until",
    "retries",
    "delay",
    "changed_when",
    "failed_when",
    "ignore_errors",
    "run_once",
    "no_log",
    "listen",
    "vars",
    "args",
    "tags",
    "become",
    "become_user",
    "environment",
    "delegate_to",
    "check_mode",
    "diff",
];

const FREE_FORM_ACTIONS: &[&str] = &[
    "command",
    "shell",
    "raw",
    "script",
    "meta",
    "include_tasks",
    "import_tasks",
];

const INCLUDE_ACTIONS: &[&str] = &["include_tasks", "import_tasks", "include"];

/// Which part of a block a task list lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Block,
    Rescue,
    Always,
}

/// Context for compiling one task file
#[derive(Debug, Clone)]
struct Scope {
    /// Directory relative includes resolve against
    dir: PathBuf,
    parents: Vec<String>,
    role: Option<String>,
    handler: bool,
}

/// Turns playbook files into compiled plays
#[derive(Debug)]
pub struct PlaySource<'a> {
    loader: &'a dyn Loader,
    roles_path: Vec<PathBuf>,
}

impl<'a> PlaySource<'a> {
    pub fn new(loader: &'a dyn Loader, roles_path: Vec<PathBuf>) -> Self {
        Self { loader, roles_path }
    }

    /// Load every play in a playbook file
    pub fn load_playbook(&self, path: &Path) -> Result<Vec<Play>> {
        let full = self.loader.path_dwim(path);
        let data = self.loader.load_file(&full)?;
        let basedir = full.parent().map(Path::to_path_buf).unwrap_or_default();
        let JsonValue::Array(plays) = data else {
            return Err(Error::playbook(&full, "a playbook must be a list of plays"));
        };
        plays
            .iter()
            .map(|play| self.compile_play(play, &basedir))
            .collect()
    }

    /// Compile one play mapping
    pub fn compile_play(&self, data: &JsonValue, basedir: &Path) -> Result<Play> {
        let JsonValue::Object(map) = data else {
            return Err(Error::playbook(basedir, "a play must be a mapping"));
        };

        let hosts = match map.get("hosts") {
            Some(JsonValue::String(s)) => vec![s.clone()],
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(String::from)
                .collect(),
            _ => return Err(Error::playbook(basedir, "play is missing 'hosts'")),
        };

        let mut play = Play::new(
            map.get("name").and_then(JsonValue::as_str).unwrap_or_default(),
            String::new(),
        );
        play.hosts = hosts;
        play.gather_facts = map.get("gather_facts").map(is_truthy);
        play.force_handlers = map.get("force_handlers").map(is_truthy);
        play.strategy = map
            .get("strategy")
            .and_then(JsonValue::as_str)
            .map(String::from);
        if let Some(order) = map.get("order").and_then(JsonValue::as_str) {
            play.order = order.parse::<HostOrder>()?;
        }
        play.serial = parse_serial(map.get("serial"))?;
        if let Some(JsonValue::Object(vars)) = map.get("vars") {
            play.vars = vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }

        let scope = Scope {
            dir: basedir.to_path_buf(),
            parents: Vec::new(),
            role: None,
            handler: false,
        };

        let pre_tasks = self.compile_blocks(list_at(map, "pre_tasks"), &scope)?;
        let has_pre = !pre_tasks.is_empty();
        play.blocks.extend(pre_tasks);
        if has_pre {
            play.blocks
                .push(Block::from_tasks(vec![Task::meta("flush_handlers")]));
        }

        let mut role_handlers = Vec::new();
        for role in list_at(map, "roles") {
            let (blocks, handlers, defaults, vars) = self.compile_role(role, basedir)?;
            play.blocks.extend(blocks);
            role_handlers.extend(handlers);
            for (k, v) in defaults {
                play.vars.entry(k).or_insert(v);
            }
            play.vars.extend(vars);
        }

        play.blocks
            .extend(self.compile_blocks(list_at(map, "tasks"), &scope)?);

        let post_tasks = self.compile_blocks(list_at(map, "post_tasks"), &scope)?;
        if !post_tasks.is_empty() {
            play.blocks
                .push(Block::from_tasks(vec![Task::meta("flush_handlers")]));
            play.blocks.extend(post_tasks);
        }

        let handler_scope = Scope {
            handler: true,
            ..scope
        };
        play.handlers = role_handlers;
        play.handlers
            .extend(self.compile_flat(list_at(map, "handlers"), &handler_scope)?);

        debug!(
            "Compiled play '{}' with {} blocks and {} handlers",
            play.name,
            play.blocks.len(),
            play.handlers.len()
        );
        Ok(play)
    }

    fn compile_role(
        &self,
        entry: &JsonValue,
        basedir: &Path,
    ) -> Result<(Vec<Block>, Vec<Arc<Task>>, IndexMap<String, JsonValue>, IndexMap<String, JsonValue>)> {
        let (name, inline_vars) = match entry {
            JsonValue::String(name) => (name.clone(), JsonMap::new()),
            JsonValue::Object(map) => {
                let name = map
                    .get("role")
                    .or_else(|| map.get("name"))
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| Error::playbook(basedir, "role entry has no name"))?;
                let vars = map
                    .get("vars")
                    .and_then(JsonValue::as_object)
                    .cloned()
                    .unwrap_or_default();
                (name.to_string(), vars)
            }
            _ => return Err(Error::playbook(basedir, "invalid role entry")),
        };

        let role_dir = self
            .roles_path
            .iter()
            .map(|p| self.loader.path_dwim(p).join(&name))
            .chain(std::iter::once(basedir.join("roles").join(&name)))
            .find(|p| p.is_dir())
            .ok_or_else(|| Error::playbook(basedir, format!("the role '{name}' was not found")))?;
        trace!("Loading role {} from {}", name, role_dir.display());

        let scope = Scope {
            dir: role_dir.join("tasks"),
            parents: Vec::new(),
            role: Some(name.clone()),
            handler: false,
        };
        let blocks = match self.role_file(&role_dir, "tasks")? {
            Some(tasks) => self.compile_blocks(as_list(&tasks), &scope)?,
            None => Vec::new(),
        };

        let handler_scope = Scope {
            dir: role_dir.join("handlers"),
            handler: true,
            ..scope
        };
        let handlers = match self.role_file(&role_dir, "handlers")? {
            Some(handlers) => self.compile_flat(as_list(&handlers), &handler_scope)?,
            None => Vec::new(),
        };

        let defaults = self.role_vars(&role_dir, "defaults")?;
        let mut vars = self.role_vars(&role_dir, "vars")?;
        vars.extend(inline_vars);

        Ok((blocks, handlers, defaults, vars))
    }

    fn role_file(&self, role_dir: &Path, kind: &str) -> Result<Option<JsonValue>> {
        for file in ["main.yml", "main.yaml"] {
            let path = role_dir.join(kind).join(file);
            if path.is_file() {
                return self.loader.load_file(&path).map(Some);
            }
        }
        Ok(None)
    }

    fn role_vars(&self, role_dir: &Path, kind: &str) -> Result<IndexMap<String, JsonValue>> {
        Ok(match self.role_file(role_dir, kind)? {
            Some(JsonValue::Object(vars)) => vars.into_iter().collect(),
            _ => IndexMap::new(),
        })
    }

    /// Compile a task list into blocks; loose tasks share implicit blocks
    fn compile_blocks(&self, entries: &[JsonValue], scope: &Scope) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut loose = Vec::new();

        for entry in entries {
            if is_block(entry) {
                if !loose.is_empty() {
                    blocks.push(Block {
                        block: std::mem::take(&mut loose),
                        ..Default::default()
                    });
                }
                blocks.push(self.compile_block(entry, scope)?);
            } else {
                self.compile_into(entry, scope, &mut loose)?;
            }
        }
        if !loose.is_empty() {
            blocks.push(Block {
                block: loose,
                ..Default::default()
            });
        }
        Ok(blocks)
    }

    fn compile_block(&self, entry: &JsonValue, scope: &Scope) -> Result<Block> {
        let map = entry
            .as_object()
            .ok_or_else(|| Error::playbook(&scope.dir, "a block must be a mapping"))?;
        let mut block = Block {
            name: map.get("name").and_then(JsonValue::as_str).map(String::from),
            ..Default::default()
        };

        for (key, section) in [
            ("block", Section::Block),
            ("rescue", Section::Rescue),
            ("always", Section::Always),
        ] {
            let target = match section {
                Section::Block => &mut block.block,
                Section::Rescue => &mut block.rescue,
                Section::Always => &mut block.always,
            };
            for item in list_at(map, key) {
                if is_block(item) {
                    let nested = self.compile_block(item, scope)?;
                    if !nested.rescue.is_empty() || !nested.always.is_empty() {
                        return Err(Error::playbook(
                            &scope.dir,
                            "nested blocks with rescue or always sections are not supported",
                        ));
                    }
                    target.extend(nested.block);
                } else {
                    self.compile_into(item, scope, target)?;
                }
            }
        }

        // Block level keywords apply to every task inside
        let when = conditionals(map.get("when"));
        let ignore_errors = map.get("ignore_errors").map(is_truthy);
        if !when.is_empty() || ignore_errors.is_some() {
            for task in block
                .block
                .iter_mut()
                .chain(block.rescue.iter_mut())
                .chain(block.always.iter_mut())
            {
                let task = Arc::make_mut(task);
                let mut merged = when.clone();
                merged.append(&mut task.when);
                task.when = merged;
                if let Some(ignore) = ignore_errors {
                    task.ignore_errors |= ignore;
                }
            }
        }
        Ok(block)
    }

    /// Compile handlers or includes into a flat list
    fn compile_flat(&self, entries: &[JsonValue], scope: &Scope) -> Result<Vec<Arc<Task>>> {
        let mut tasks = Vec::new();
        for entry in entries {
            if is_block(entry) {
                let block = self.compile_block(entry, scope)?;
                tasks.extend(block.block);
                tasks.extend(block.rescue);
                tasks.extend(block.always);
            } else {
                self.compile_into(entry, scope, &mut tasks)?;
            }
        }
        Ok(tasks)
    }

    /// Compile one entry, expanding static includes in place
    fn compile_into(&self, entry: &JsonValue, scope: &Scope, out: &mut Vec<Arc<Task>>) -> Result<()> {
        let task = self.compile_task(entry, scope)?;

        if INCLUDE_ACTIONS.contains(&task.action.as_str()) {
            let file = task
                .args
                .get("_raw_params")
                .or_else(|| task.args.get("file"))
                .and_then(JsonValue::as_str)
                .ok_or_else(|| Error::playbook(&scope.dir, "include without a file name"))?;
            let path = scope.dir.join(file);
            let loaded = self.loader.load_file(&path)?;

            let mut parents = scope.parents.clone();
            parents.push(task.get_name().to_string());
            let inner = Scope {
                dir: path.parent().map(Path::to_path_buf).unwrap_or_else(|| scope.dir.clone()),
                parents,
                role: scope.role.clone(),
                handler: scope.handler,
            };
            for mut included in self.compile_flat(as_list(&loaded), &inner)? {
                let included_task = Arc::make_mut(&mut included);
                let mut when = task.when.clone();
                when.append(&mut included_task.when);
                included_task.when = when;
                for (k, v) in &task.vars {
                    included_task.vars.entry(k.clone()).or_insert_with(|| v.clone());
                }
                out.push(included);
            }
            return Ok(());
        }

        out.push(Arc::new(task));
        Ok(())
    }

    fn compile_task(&self, entry: &JsonValue, scope: &Scope) -> Result<Task> {
        let map = entry
            .as_object()
            .ok_or_else(|| Error::playbook(&scope.dir, "a task must be a mapping"))?;

        let (action, mut args) = find_action(map)
            .ok_or_else(|| Error::playbook(&scope.dir, format!("no action detected in task: {entry}")))?;
        if let Some(JsonValue::Object(extra)) = map.get("args") {
            for (k, v) in extra {
                args.insert(k.clone(), v.clone());
            }
        }

        let mut task = Task::new(action, args);
        task.name = map
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        task.when = conditionals(map.get("when"));
        task.register = map.get("register").and_then(JsonValue::as_str).map(String::from);
        task.notify = string_list(map.get("notify"));
        task.listen = string_list(map.get("listen"));
        task.loop_items = map.get("loop").or_else(|| map.get("with_items")).cloned();
        if let Some(var) = map
            .get("loop_control")
            .and_then(|lc| lc.get("loop_var"))
            .and_then(JsonValue::as_str)
        {
            task.loop_var = var.to_string();
        }
        task.until = map.get("until").map(condition_text);
        task.retries = map
            .get("retries")
            .and_then(JsonValue::as_u64)
            .map(|n| n as u32);
        if let Some(delay) = map.get("delay").and_then(JsonValue::as_u64) {
            task.delay = delay;
        }
        task.changed_when = map.get("changed_when").map(condition_text);
        task.failed_when = map.get("failed_when").map(condition_text);
        task.ignore_errors = map.get("ignore_errors").is_some_and(is_truthy);
        task.run_once = map.get("run_once").is_some_and(is_truthy);
        task.no_log = map.get("no_log").is_some_and(is_truthy);
        if let Some(JsonValue::Object(vars)) = map.get("vars") {
            task.vars = vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        task.parents = scope.parents.clone();
        task.role = scope.role.clone();
        task.is_handler = scope.handler;
        Ok(task)
    }
}

fn list_at<'m>(map: &'m JsonMap<String, JsonValue>, key: &str) -> &'m [JsonValue] {
    map.get(key).map(as_list).unwrap_or(&[])
}

fn as_list(value: &JsonValue) -> &[JsonValue] {
    match value {
        JsonValue::Array(items) => items,
        _ => &[],
    }
}

fn is_block(entry: &JsonValue) -> bool {
    entry.get("block").is_some()
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) => matches!(s.to_lowercase().as_str(), "yes" | "true" | "1" | "on"),
        JsonValue::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn condition_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn conditionals(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items.iter().map(condition_text).collect(),
        Some(other) => vec![condition_text(other)],
    }
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_serial(value: Option<&JsonValue>) -> Result<Vec<SerialSpec>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items: Vec<JsonValue> = match value {
        JsonValue::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<SerialSpec>(item)
                .map_err(|e| Error::playbook("serial", e.to_string()))
        })
        .collect()
}

/// Parse `k=v k2="v 2"` into arguments; anything else is `_raw_params`
fn parse_kv(action: &str, text: &str) -> JsonMap<String, JsonValue> {
    let mut args = JsonMap::new();
    if FREE_FORM_ACTIONS.contains(&action) {
        args.insert("_raw_params".into(), JsonValue::from(text.trim()));
        return args;
    }
    match shell_words::split(text) {
        Ok(tokens) if !tokens.is_empty() && tokens.iter().all(|t| t.contains('=')) => {
            for token in tokens {
                if let Some((k, v)) = token.split_once('=') {
                    args.insert(k.to_string(), JsonValue::from(v));
                }
            }
        }
        _ => {
            args.insert("_raw_params".into(), JsonValue::from(text.trim()));
        }
    }
    args
}

fn action_args(action: &str, value: &JsonValue) -> JsonMap<String, JsonValue> {
    match value {
        JsonValue::Null => JsonMap::new(),
        JsonValue::String(s) => parse_kv(action, s),
        JsonValue::Object(map) => map.clone(),
        other => {
            let mut args = JsonMap::new();
            args.insert("_raw_params".into(), other.clone());
            args
        }
    }
}

fn find_action(map: &JsonMap<String, JsonValue>) -> Option<(String, JsonMap<String, JsonValue>)> {
    if let Some(action) = map.get("action").or_else(|| map.get("local_action")) {
        return match action {
            JsonValue::String(s) => {
                let (name, rest) = s.trim().split_once(char::is_whitespace).unwrap_or((s.trim(), ""));
                Some((name.to_string(), parse_kv(name, rest)))
            }
            JsonValue::Object(obj) => {
                let name = obj.get("module").and_then(JsonValue::as_str)?.to_string();
                let mut args = obj.clone();
                args.remove("module");
                Some((name, args))
            }
            _ => None,
        };
    }

    map.iter()
        .find(|(key, _)| !TASK_KEYWORDS.contains(&key.as_str()))
        .map(|(key, value)| {
            let name = key
                .rsplit('.')
                .next()
                .unwrap_or(key.as_str())
                .to_string();
            let args = action_args(&name, value);
            (name, args)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::YamlLoader;
    use serde_json::json;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_bare_and_action_forms() {
        let loader = YamlLoader::default();
        let source = PlaySource::new(&loader, vec![]);
        let scope = Scope {
            dir: PathBuf::from("."),
            parents: vec![],
            role: None,
            handler: false,
        };

        let task = source
            .compile_task(&json!({"name": "list", "command": "ls -l /tmp", "register": "out"}), &scope)
            .unwrap();
        assert_eq!(task.action, "command");
        assert_eq!(task.args["_raw_params"], json!("ls -l /tmp"));
        assert_eq!(task.register.as_deref(), Some("out"));

        let task = source
            .compile_task(&json!({"action": "debug msg=hello"}), &scope)
            .unwrap();
        assert_eq!(task.action, "debug");
        assert_eq!(task.args["msg"], json!("hello"));

        let task = source
            .compile_task(&json!({"ansible.builtin.set_fact": {"a": 1}, "when": [true, "x"]}), &scope)
            .unwrap();
        assert_eq!(task.action, "set_fact");
        assert_eq!(task.when, vec!["true", "x"]);

        let task = source.compile_task(&json!({"meta": "flush_handlers"}), &scope).unwrap();
        assert_eq!(task.meta_op(), Some("flush_handlers"));
    }

    #[test]
    fn test_compile_play_with_blocks_includes_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "site.yml",
            r#"
- name: web
  hosts: web:&prod
  serial: ["50%", 2]
  order: sorted
  roles:
    - nginx
  pre_tasks:
    - ping:
  tasks:
    - name: setup things
      include_tasks: extra.yml
    - block:
        - command: /bin/false
      rescue:
        - debug: msg=rescued
      always:
        - debug: msg=always
  handlers:
    - name: restart stack
      include_tasks: restart.yml
"#,
        );
        write(dir.path(), "extra.yml", "- debug: msg=one\n- debug: msg=two\n");
        write(
            dir.path(),
            "restart.yml",
            "- name: restart app\n  command: /bin/true\n",
        );
        write(
            dir.path(),
            "roles/nginx/tasks/main.yml",
            "- name: install\n  command: /bin/true\n  notify: reload nginx\n",
        );
        write(
            dir.path(),
            "roles/nginx/handlers/main.yml",
            "- name: reload nginx\n  command: /bin/true\n",
        );
        write(dir.path(), "roles/nginx/defaults/main.yml", "port: 80\n");

        let loader = YamlLoader::new(dir.path());
        let source = PlaySource::new(&loader, vec![]);
        let plays = source.load_playbook(Path::new("site.yml")).unwrap();
        let play = &plays[0];

        assert_eq!(play.hosts, vec!["web:&prod"]);
        assert_eq!(play.order, HostOrder::Sorted);
        assert_eq!(
            play.serial,
            vec![SerialSpec::Percentage("50%".into()), SerialSpec::Fixed(2)]
        );
        assert_eq!(play.vars["port"], json!(80));

        // pre_tasks, flush, role, included tasks, explicit block
        assert_eq!(play.blocks.len(), 5);
        assert_eq!(play.blocks[1].block[0].meta_op(), Some("flush_handlers"));
        assert_eq!(play.blocks[2].block[0].role.as_deref(), Some("nginx"));
        let included = &play.blocks[3].block;
        assert_eq!(included.len(), 2);
        assert_eq!(included[0].parents, vec!["setup things"]);
        assert_eq!(play.blocks[4].rescue.len(), 1);
        assert_eq!(play.blocks[4].always.len(), 1);

        assert_eq!(play.handlers.len(), 2);
        assert_eq!(play.handlers[0].display_name(), "nginx : reload nginx");
        assert!(play.handlers[1].is_handler);
        assert_eq!(play.handlers[1].parents, vec!["restart stack"]);
    }

    #[test]
    fn test_nested_block_with_rescue_rejected() {
        let loader = YamlLoader::default();
        let source = PlaySource::new(&loader, vec![]);
        let play = json!({
            "hosts": "all",
            "tasks": [{"block": [{"block": [{"ping": null}], "rescue": [{"ping": null}]}]}]
        });
        assert!(source.compile_play(&play, Path::new(".")).is_err());

        let flat = json!({
            "hosts": "all",
            "tasks": [{"block": [{"block": [{"ping": null}]}, {"ping": null}], "when": "go"}]
        });
        let play = source.compile_play(&flat, Path::new(".")).unwrap();
        assert_eq!(play.blocks[0].block.len(), 2);
        assert_eq!(play.blocks[0].block[0].when, vec!["go"]);
    }

    #[test]
    fn test_missing_hosts_is_error() {
        let loader = YamlLoader::default();
        let source = PlaySource::new(&loader, vec![]);
        assert!(source.compile_play(&json!({"tasks": []}), Path::new(".")).is_err());
    }
}
