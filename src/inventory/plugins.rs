//! Inventory source plugins.
//!
//! Each plugin decides whether it can read a source (`verify_source`) and
//! then populates an [`InventoryData`]. The manager tries enabled plugins in
//! configured order and the first successful parse wins.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Command;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, trace};

use super::address::{expand_hostname_range, parse_address};
use super::data::InventoryData;
use super::group::{ALL, UNGROUPED};
use super::InventoryError;
use crate::error::{Error, Result};
use crate::loader::Loader;

/// A source of hosts and groups
pub trait InventoryPlugin: Send + Sync + fmt::Debug {
    /// Plugin name used in configuration
    fn name(&self) -> &'static str;

    /// Whether this plugin can read the source
    fn verify_source(&self, source: &str) -> bool;

    /// Populate `data` from the source
    fn parse(&self, data: &mut InventoryData, loader: &dyn Loader, source: &str) -> Result<()>;
}

type PluginConstructor = fn() -> Box<dyn InventoryPlugin>;

/// Name to constructor map for inventory plugins
#[derive(Debug, Clone)]
pub struct InventoryPluginRegistry {
    constructors: HashMap<&'static str, PluginConstructor>,
}

impl Default for InventoryPluginRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register("host_list", || Box::new(HostListPlugin));
        registry.register("script", || Box::new(ScriptPlugin));
        registry.register("yaml", || Box::new(YamlPlugin));
        registry.register("ini", || Box::new(IniPlugin));
        registry
    }
}

impl InventoryPluginRegistry {
    /// Register a plugin constructor
    pub fn register(&mut self, name: &'static str, constructor: PluginConstructor) {
        self.constructors.insert(name, constructor);
    }

    /// Instantiate the named plugins in order, failing on an unknown name
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Box<dyn InventoryPlugin>>> {
        names
            .iter()
            .map(|name| {
                self.constructors
                    .get(name.as_str())
                    .map(|ctor| ctor())
                    .ok_or_else(|| Error::Config(format!("unknown inventory plugin '{name}'")))
            })
            .collect()
    }
}

/// Expand `name[:port]` with ranges into concrete hosts
fn expand_host_pattern(pattern: &str) -> Result<Vec<(String, Option<u16>)>> {
    let (name, port) = parse_address(pattern, true)?;
    Ok(expand_hostname_range(&name)?
        .into_iter()
        .map(|n| (n, port))
        .collect())
}

fn add_expanded_hosts(
    data: &mut InventoryData,
    pattern: &str,
    group: &str,
    vars: &JsonMap<String, JsonValue>,
) -> Result<()> {
    for (name, port) in expand_host_pattern(pattern)? {
        let host = data.add_host(&name, Some(group))?;
        if let Some(port) = port {
            host.set_var("ansible_port", JsonValue::from(port));
        }
        for (key, value) in vars {
            host.set_var(key.clone(), value.clone());
        }
    }
    Ok(())
}

// ============================================================================
// host_list
// ============================================================================

/// Comma separated literal host list (`"web1,web2:2222,"`)
#[derive(Debug, Default)]
pub struct HostListPlugin;

impl InventoryPlugin for HostListPlugin {
    fn name(&self) -> &'static str {
        "host_list"
    }

    fn verify_source(&self, source: &str) -> bool {
        !Path::new(source).exists() && source.contains(',')
    }

    fn parse(&self, data: &mut InventoryData, _loader: &dyn Loader, source: &str) -> Result<()> {
        for entry in source.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, port) = parse_address(entry, false).unwrap_or((entry.to_string(), None));
            if !data.has_host(&name) {
                let host = data.add_host(&name, Some(UNGROUPED))?;
                if let Some(port) = port {
                    host.set_var("ansible_port", JsonValue::from(port));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// script
// ============================================================================

/// Executable returning JSON for `--list`
#[derive(Debug, Default)]
pub struct ScriptPlugin;

impl ScriptPlugin {
    fn is_executable(path: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            path.metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            false
        }
    }
}

impl InventoryPlugin for ScriptPlugin {
    fn name(&self) -> &'static str {
        "script"
    }

    fn verify_source(&self, source: &str) -> bool {
        Self::is_executable(Path::new(source))
    }

    fn parse(&self, data: &mut InventoryData, _loader: &dyn Loader, source: &str) -> Result<()> {
        let output = Command::new(source)
            .arg("--list")
            .output()
            .map_err(|e| InventoryError::DynamicInventoryFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(InventoryError::DynamicInventoryFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            )
            .into());
        }
        let parsed: JsonValue = serde_json::from_slice(&output.stdout)?;
        parse_script_json(data, &parsed)
    }
}

/// Populate from the `{group: {hosts, vars, children}, _meta: {hostvars}}` shape
pub fn parse_script_json(data: &mut InventoryData, parsed: &JsonValue) -> Result<()> {
    let JsonValue::Object(map) = parsed else {
        return Err(InventoryError::DynamicInventoryFailed("expected a JSON object".into()).into());
    };

    for (name, value) in map {
        if name == "_meta" {
            continue;
        }
        data.add_group(name)?;
        match value {
            JsonValue::Array(hosts) => {
                for host in hosts.iter().filter_map(JsonValue::as_str) {
                    data.add_host(host, Some(name))?;
                }
            }
            JsonValue::Object(group) => {
                if let Some(JsonValue::Array(hosts)) = group.get("hosts") {
                    for host in hosts.iter().filter_map(JsonValue::as_str) {
                        data.add_host(host, Some(name))?;
                    }
                }
                if let Some(JsonValue::Object(vars)) = group.get("vars") {
                    for (key, value) in vars {
                        data.set_variable(name, key, value.clone())?;
                    }
                }
                if let Some(JsonValue::Array(children)) = group.get("children") {
                    for child in children.iter().filter_map(JsonValue::as_str) {
                        data.add_group(child)?;
                        data.add_child_group(name, child)?;
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(JsonValue::Object(hostvars)) = map.get("_meta").and_then(|m| m.get("hostvars")) {
        for (host, vars) in hostvars {
            if !data.has_host(host) {
                data.add_host(host, None)?;
            }
            if let JsonValue::Object(vars) = vars {
                for (key, value) in vars {
                    data.set_variable(host, key, value.clone())?;
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// yaml
// ============================================================================

/// `all: {hosts, vars, children}` documents in YAML or JSON
#[derive(Debug, Default)]
pub struct YamlPlugin;

impl YamlPlugin {
    fn parse_group(&self, data: &mut InventoryData, name: &str, value: &JsonValue) -> Result<()> {
        data.add_group(name)?;
        let JsonValue::Object(map) = value else {
            return Ok(());
        };

        for (key, entry) in map {
            match key.as_str() {
                "hosts" => {
                    let JsonValue::Object(hosts) = entry else {
                        if !entry.is_null() {
                            return Err(Error::parse(name, "group 'hosts' must be a mapping"));
                        }
                        continue;
                    };
                    for (pattern, vars) in hosts {
                        let empty = JsonMap::new();
                        let vars = vars.as_object().unwrap_or(&empty);
                        add_expanded_hosts(data, pattern, name, vars)?;
                    }
                }
                "vars" => {
                    if let JsonValue::Object(vars) = entry {
                        for (k, v) in vars {
                            data.set_variable(name, k, v.clone())?;
                        }
                    }
                }
                "children" => {
                    if let JsonValue::Object(children) = entry {
                        for (child, body) in children {
                            self.parse_group(data, child, body)?;
                            if name != ALL {
                                data.add_child_group(name, child)?;
                            }
                        }
                    }
                }
                other => trace!("Ignoring unknown key '{}' in group '{}'", other, name),
            }
        }
        Ok(())
    }
}

impl InventoryPlugin for YamlPlugin {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn verify_source(&self, source: &str) -> bool {
        let path = Path::new(source);
        path.is_file()
            && matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yml" | "yaml" | "json")
            )
    }

    fn parse(&self, data: &mut InventoryData, loader: &dyn Loader, source: &str) -> Result<()> {
        let parsed = loader.load_file(Path::new(source))?;
        match parsed {
            JsonValue::Null => Ok(()),
            JsonValue::Object(map) => {
                for (name, body) in &map {
                    self.parse_group(data, name, body)?;
                }
                Ok(())
            }
            _ => Err(Error::parse(source, "YAML inventory has invalid structure")),
        }
    }
}

// ============================================================================
// ini
// ============================================================================

/// `[group]`, `[group:vars]`, `[group:children]` files
#[derive(Debug, Default)]
pub struct IniPlugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IniSection {
    Hosts,
    Vars,
    Children,
}

/// Convert an INI value into a typed JSON value
pub fn parse_ini_value(value: &str) -> JsonValue {
    let value = value.trim();

    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        return JsonValue::String(value[1..value.len() - 1].to_string());
    }

    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" => return JsonValue::Bool(true),
        "false" | "no" | "off" => return JsonValue::Bool(false),
        _ => {}
    }

    if let Ok(n) = value.parse::<i64>() {
        return JsonValue::from(n);
    }
    if let Ok(n) = value.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return JsonValue::Number(num);
        }
    }

    JsonValue::String(value.to_string())
}

impl IniPlugin {
    fn parse_content(&self, data: &mut InventoryData, content: &str) -> Result<()> {
        let mut group = UNGROUPED.to_string();
        let mut section = IniSection::Hosts;
        let mut pending_children: Vec<(String, String)> = Vec::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let header = &line[1..line.len() - 1];
                let (name, kind) = match header.rsplit_once(':') {
                    Some((name, "vars")) => (name, IniSection::Vars),
                    Some((name, "children")) => (name, IniSection::Children),
                    Some(_) => {
                        return Err(InventoryError::InvalidIniFormat(format!(
                            "line {}: invalid section entry '{}'",
                            lineno + 1,
                            line
                        ))
                        .into());
                    }
                    None => (header, IniSection::Hosts),
                };
                group = name.to_string();
                section = kind;
                data.add_group(&group)?;
                continue;
            }

            match section {
                IniSection::Vars => {
                    let Some((key, value)) = line.split_once('=') else {
                        return Err(InventoryError::InvalidIniFormat(format!(
                            "line {}: expected key=value in [{}:vars]",
                            lineno + 1,
                            group
                        ))
                        .into());
                    };
                    data.set_variable(&group, key.trim(), parse_ini_value(value))?;
                }
                IniSection::Children => {
                    pending_children.push((group.clone(), line.to_string()));
                }
                IniSection::Hosts => {
                    let tokens = shell_words::split(line).map_err(|e| {
                        InventoryError::InvalidIniFormat(format!("line {}: {}", lineno + 1, e))
                    })?;
                    let Some((pattern, rest)) = tokens.split_first() else {
                        continue;
                    };
                    let mut vars = JsonMap::new();
                    for token in rest {
                        let Some((key, value)) = token.split_once('=') else {
                            return Err(InventoryError::InvalidIniFormat(format!(
                                "line {}: expected key=value host variable, got '{}'",
                                lineno + 1,
                                token
                            ))
                            .into());
                        };
                        vars.insert(key.to_string(), parse_ini_value(value));
                    }
                    add_expanded_hosts(data, pattern, &group, &vars)?;
                }
            }
        }

        for (parent, child) in pending_children {
            data.add_group(&child)?;
            data.add_child_group(&parent, &child)?;
        }
        Ok(())
    }
}

impl InventoryPlugin for IniPlugin {
    fn name(&self) -> &'static str {
        "ini"
    }

    fn verify_source(&self, source: &str) -> bool {
        let path = Path::new(source);
        path.is_file()
            && !matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yml" | "yaml" | "json")
            )
    }

    fn parse(&self, data: &mut InventoryData, loader: &dyn Loader, source: &str) -> Result<()> {
        debug!("Parsing INI inventory {}", source);
        let content = loader.read_text(Path::new(source))?;
        self.parse_content(data, &content)
    }
}
