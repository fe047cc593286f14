//! Inventory manager: sources, limits, and the public query surface.
//!
//! The manager owns the store, parses configured sources through the
//! enabled plugins, and answers `get_hosts` queries through the
//! [`PatternResolver`], applying the active subset (`--limit`) and host
//! restriction (serial batches).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use super::data::InventoryData;
use super::host::Host;
use super::pattern::{split_host_pattern, PatternInput};
use super::plugins::{InventoryPlugin, InventoryPluginRegistry};
use super::resolver::{HostOrder, PatternResolver};
use crate::config::InventoryConfig;
use crate::error::{Error, Result};
use crate::loader::Loader;

const IGNORED_EXTENSIONS: [&str; 3] = ["retry", "pyc", "orig"];
const VARS_DIRS: [&str; 2] = ["group_vars", "host_vars"];

/// Hosts, groups, sources, and the pattern query surface
#[derive(Debug)]
pub struct InventoryManager {
    data: InventoryData,
    resolver: PatternResolver,
    config: InventoryConfig,
    plugins: Vec<Box<dyn InventoryPlugin>>,
    loader: Arc<dyn Loader>,
    subset: Option<Vec<String>>,
    restriction: Option<IndexSet<String>>,
}

impl InventoryManager {
    /// Create a manager with the configured plugins; sources are not parsed yet
    pub fn new(config: InventoryConfig, loader: Arc<dyn Loader>) -> Result<Self> {
        let plugins = InventoryPluginRegistry::default().resolve(&config.enabled_plugins)?;
        Ok(Self {
            data: InventoryData::with_localhost_aliases(config.localhost_aliases.clone()),
            resolver: PatternResolver::new(),
            config,
            plugins,
            loader,
            subset: None,
            restriction: None,
        })
    }

    /// Wrap an already populated store
    pub fn from_data(mut data: InventoryData, loader: Arc<dyn Loader>) -> Self {
        data.reconcile();
        let config = InventoryConfig::default();
        let plugins = InventoryPluginRegistry::default()
            .resolve(&config.enabled_plugins)
            .unwrap_or_default();
        Self {
            data,
            resolver: PatternResolver::new(),
            config,
            plugins,
            loader,
            subset: None,
            restriction: None,
        }
    }

    /// Read access to the store
    pub fn data(&self) -> &InventoryData {
        &self.data
    }

    /// Mutable access to the store; pattern caches are dropped
    pub fn data_mut(&mut self) -> &mut InventoryData {
        self.resolver.clear();
        &mut self.data
    }

    /// Drop both pattern caches
    pub fn clear_pattern_cache(&self) {
        self.resolver.clear();
    }

    /// Configured sources
    pub fn sources(&self) -> &[String] {
        &self.config.sources
    }

    /// Parse every configured source, then reconcile.
    #[instrument(skip(self), fields(sources = self.config.sources.len()))]
    pub fn parse_sources(&mut self) -> Result<()> {
        let mut parsed = false;
        for source in self.config.sources.clone() {
            parsed |= self.parse_source(&source)?;
        }
        if !parsed {
            warn!("No inventory was parsed, only implicit localhost is available");
        }
        self.data.reconcile();
        self.resolver.clear();
        Ok(())
    }

    /// Parse one source; returns whether any plugin accepted it.
    ///
    /// A source no plugin can read is fatal only when
    /// `unparsed_is_failed` is set; otherwise it is skipped with a warning.
    pub fn parse_source(&mut self, source: &str) -> Result<bool> {
        let path = expand_home(source);

        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| !is_ignored(p))
                .collect();
            entries.sort();
            let mut parsed = false;
            for entry in entries {
                parsed |= self.parse_source(&entry.to_string_lossy())?;
            }
            self.load_vars_dirs(&path)?;
            return Ok(parsed);
        }

        let source_text = path.to_string_lossy().to_string();
        let mut failures = Vec::new();
        for plugin in &self.plugins {
            if !plugin.verify_source(&source_text) {
                continue;
            }
            match plugin.parse(&mut self.data, self.loader.as_ref(), &source_text) {
                Ok(()) => {
                    info!("Parsed {} inventory source with {} plugin", source_text, plugin.name());
                    if let Some(parent) = path.parent().filter(|p| p.is_dir()) {
                        self.load_vars_dirs(parent)?;
                    }
                    self.resolver.clear();
                    return Ok(true);
                }
                Err(e) => {
                    debug!("{} declined to parse {}: {}", plugin.name(), source_text, e);
                    failures.push(format!("{}: {}", plugin.name(), e));
                }
            }
        }

        let message = if failures.is_empty() {
            "no enabled inventory plugin accepted the source".to_string()
        } else {
            failures.join("; ")
        };
        if self.config.unparsed_is_failed {
            return Err(Error::InventorySource {
                source_name: source.to_string(),
                message,
            });
        }
        warn!("Unable to parse {} as an inventory source: {}", source, message);
        Ok(false)
    }

    /// Apply `group_vars/<group>.yml` and `host_vars/<host>.yml` next to a source
    fn load_vars_dirs(&mut self, dir: &Path) -> Result<()> {
        for kind in VARS_DIRS {
            let vars_dir = dir.join(kind);
            if !vars_dir.is_dir() {
                continue;
            }
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&vars_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && !is_ignored(p))
                .collect();
            entries.sort();
            for file in entries {
                let Some(entity) = file.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let known = if kind == "group_vars" {
                    self.data.get_group(entity).is_some()
                } else {
                    self.data.has_host(entity)
                };
                if !known {
                    continue;
                }
                if let JsonValue::Object(vars) = self.loader.load_file(&file)? {
                    for (key, value) in vars {
                        self.data.set_variable(entity, &key, value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Discard the store and re-parse every source
    pub fn refresh_inventory(&mut self) -> Result<()> {
        info!("Refreshing inventory");
        self.data = InventoryData::with_localhost_aliases(self.config.localhost_aliases.clone());
        self.resolver.clear();
        self.parse_sources()
    }

    /// Resolve a pattern under the given subset and restriction
    pub fn resolve(
        &self,
        pattern: impl Into<PatternInput>,
        restrict_to: Option<&IndexSet<String>>,
        subset: Option<&[String]>,
        order: Option<HostOrder>,
    ) -> Result<Vec<String>> {
        self.resolver.resolve(
            &self.data,
            &pattern.into(),
            restrict_to,
            subset,
            order.unwrap_or_default(),
        )
    }

    /// Hosts matching a pattern.
    ///
    /// `ignore_limits` skips the subset, `ignore_restrictions` skips the
    /// host restriction.
    pub fn get_hosts(
        &self,
        pattern: impl Into<PatternInput>,
        ignore_limits: bool,
        ignore_restrictions: bool,
        order: Option<HostOrder>,
    ) -> Result<Vec<Host>> {
        let names = self.get_host_names(pattern, ignore_limits, ignore_restrictions, order)?;
        Ok(names
            .iter()
            .filter_map(|name| self.data.get_host(name).cloned())
            .collect())
    }

    /// Like [`get_hosts`](Self::get_hosts) but returns names only
    pub fn get_host_names(
        &self,
        pattern: impl Into<PatternInput>,
        ignore_limits: bool,
        ignore_restrictions: bool,
        order: Option<HostOrder>,
    ) -> Result<Vec<String>> {
        let subset = if ignore_limits {
            None
        } else {
            self.subset.as_deref()
        };
        let restriction = if ignore_restrictions {
            None
        } else {
            self.restriction.as_ref()
        };
        self.resolve(pattern, restriction, subset, order)
    }

    /// Host names for a pattern, falling back to a localhost alias literal
    pub fn list_hosts(&self, pattern: &str) -> Result<Vec<String>> {
        let hosts = self.get_host_names(pattern, false, false, None)?;
        if hosts.is_empty() && self.data.is_localhost_alias(pattern) {
            return Ok(vec![pattern.to_string()]);
        }
        Ok(hosts)
    }

    /// All group names, sorted
    pub fn list_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.data.groups().map(|g| g.name.clone()).collect();
        groups.sort();
        groups
    }

    /// Look up a host (materializing the implicit localhost for an alias)
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.data.get_host(name)
    }

    /// Restrict every later query to these host names
    pub fn restrict_to_hosts<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restriction = Some(hosts.into_iter().map(Into::into).collect());
    }

    /// Lift the host restriction
    pub fn remove_restriction(&mut self) {
        self.restriction = None;
    }

    /// Limit every later query to hosts matching `pattern`.
    ///
    /// `@path` terms read one pattern per line from a file.
    pub fn subset(&mut self, pattern: Option<&str>) -> Result<()> {
        let Some(pattern) = pattern else {
            self.subset = None;
            return Ok(());
        };

        let mut terms = Vec::new();
        for term in split_host_pattern(pattern) {
            if let Some(file) = term.strip_prefix('@') {
                let path = expand_home(file);
                if !path.exists() {
                    return Err(Error::FileNotFound(path));
                }
                let content = self.loader.read_text(&path)?;
                terms.extend(
                    content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from),
                );
            } else {
                terms.push(term);
            }
        }
        self.subset = Some(terms);
        Ok(())
    }

    /// Add (or merge) a host with groups and variables, then reconcile
    pub fn add_host(
        &mut self,
        name: &str,
        groups: &[String],
        vars: &IndexMap<String, JsonValue>,
    ) -> Result<bool> {
        let existed = self.data.has_host(name);
        self.data.add_host(name, None)?;
        let mut changed = !existed;
        for group in groups {
            if self.data.get_group(group).is_none() {
                self.data.add_group(group)?;
            }
            let already = self.data.get_group(group).is_some_and(|g| g.has_host(name));
            if !already {
                self.data.add_host_to_group(group, name)?;
                changed = true;
            }
        }
        if let Some(host) = self.data.get_host_mut(name) {
            host.merge_vars(vars);
        }
        self.data.reconcile();
        self.resolver.clear();
        Ok(changed)
    }

    /// Add a host to a (possibly new) group with parent groups, then reconcile
    pub fn add_group(&mut self, host: &str, group: &str, parents: &[String]) -> Result<bool> {
        let mut changed = false;
        if self.data.get_group(group).is_none() {
            self.data.add_group(group)?;
            changed = true;
        }
        for parent in parents {
            if self.data.get_group(parent).is_none() {
                self.data.add_group(parent)?;
                changed = true;
            }
            let linked = self.data.get_group(parent).is_some_and(|g| g.has_child(group));
            if !linked {
                self.data.add_child_group(parent, group)?;
                changed = true;
            }
        }
        if self.data.has_host(host)
            && !self.data.get_group(group).is_some_and(|g| g.has_host(host))
        {
            self.data.add_host_to_group(group, host)?;
            changed = true;
        }
        self.data.reconcile();
        self.resolver.clear();
        Ok(changed)
    }
}

fn expand_home(source: &str) -> PathBuf {
    if let Some(rest) = source.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(source)
}

fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if name.starts_with('.') || name.ends_with('~') || VARS_DIRS.contains(&name) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IGNORED_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::YamlLoader;
    use pretty_assertions::assert_eq;

    fn manager_with_sources(sources: Vec<String>, unparsed_is_failed: bool) -> InventoryManager {
        let config = InventoryConfig {
            sources,
            unparsed_is_failed,
            ..InventoryConfig::default()
        };
        InventoryManager::new(config, Arc::new(YamlLoader::default())).unwrap()
    }

    #[test]
    fn test_directory_source_and_group_vars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10-web.ini"), "[web]\nweb1\nweb2\n").unwrap();
        std::fs::write(dir.path().join("20-db.yml"), "db:\n  hosts:\n    db1:\n").unwrap();
        std::fs::write(dir.path().join("hosts.retry"), "garbage [[[").unwrap();
        std::fs::create_dir(dir.path().join("group_vars")).unwrap();
        std::fs::write(dir.path().join("group_vars/web.yml"), "http_port: 8080\n").unwrap();

        let mut manager =
            manager_with_sources(vec![dir.path().to_string_lossy().to_string()], true);
        manager.parse_sources().unwrap();

        assert_eq!(manager.list_hosts("all").unwrap(), vec!["web1", "web2", "db1"]);
        assert_eq!(
            manager.data().host_vars("web2")["http_port"],
            JsonValue::from(8080)
        );
    }

    #[test]
    fn test_unparsed_source_policy() {
        let mut lenient = manager_with_sources(vec!["/no/such/inventory".into()], false);
        assert!(lenient.parse_sources().is_ok());
        assert!(lenient.list_hosts("all").unwrap().is_empty());

        let mut strict = manager_with_sources(vec!["/no/such/inventory".into()], true);
        assert!(matches!(
            strict.parse_sources(),
            Err(Error::InventorySource { .. })
        ));
    }

    #[test]
    fn test_host_list_source() {
        let mut manager = manager_with_sources(vec!["web1,web2,".into()], true);
        manager.parse_sources().unwrap();
        assert_eq!(manager.list_hosts("ungrouped").unwrap(), vec!["web1", "web2"]);
    }

    #[test]
    fn test_limits_and_restrictions() {
        let mut manager = manager_with_sources(vec!["a1,a2,b1,b2,".into()], true);
        manager.parse_sources().unwrap();

        manager.subset(Some("a*")).unwrap();
        assert_eq!(manager.list_hosts("all").unwrap(), vec!["a1", "a2"]);
        assert_eq!(
            manager.get_host_names("all", true, false, None).unwrap(),
            vec!["a1", "a2", "b1", "b2"]
        );

        manager.restrict_to_hosts(["a2", "b2"]);
        assert_eq!(manager.list_hosts("all").unwrap(), vec!["a2"]);
        assert_eq!(
            manager.get_host_names("all", true, true, None).unwrap(),
            vec!["a1", "a2", "b1", "b2"]
        );

        manager.remove_restriction();
        manager.subset(None).unwrap();
        assert_eq!(manager.list_hosts("all").unwrap().len(), 4);
    }

    #[test]
    fn test_subset_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let limit = dir.path().join("limit.txt");
        std::fs::write(&limit, "b1\n\nb2\n").unwrap();

        let mut manager = manager_with_sources(vec!["a1,b1,b2,".into()], true);
        manager.parse_sources().unwrap();
        manager
            .subset(Some(&format!("@{}", limit.display())))
            .unwrap();
        assert_eq!(manager.list_hosts("all").unwrap(), vec!["b1", "b2"]);
    }

    #[test]
    fn test_add_host_and_group_invalidate_cache() {
        let mut manager = manager_with_sources(vec!["web1,".into()], true);
        manager.parse_sources().unwrap();
        assert!(manager.list_hosts("new").unwrap().is_empty());

        let changed = manager
            .add_host("web9", &["new".to_string()], &IndexMap::new())
            .unwrap();
        assert!(changed);
        assert_eq!(manager.list_hosts("new").unwrap(), vec!["web9"]);

        manager
            .add_group("web1", "dynamic", &["parent".to_string()])
            .unwrap();
        assert_eq!(manager.list_hosts("parent").unwrap(), vec!["web1"]);
        assert!(manager.list_groups().contains(&"dynamic".to_string()));
    }

    #[test]
    fn test_refresh_inventory_drops_runtime_hosts() {
        let mut manager = manager_with_sources(vec!["web1,".into()], true);
        manager.parse_sources().unwrap();
        manager.add_host("extra", &[], &IndexMap::new()).unwrap();
        assert_eq!(manager.list_hosts("all").unwrap(), vec!["web1", "extra"]);
        manager.refresh_inventory().unwrap();
        assert_eq!(manager.list_hosts("all").unwrap(), vec!["web1"]);
    }

    #[test]
    fn test_list_hosts_localhost_fallback() {
        let manager = manager_with_sources(vec![], false);
        assert_eq!(manager.list_hosts("localhost").unwrap(), vec!["localhost"]);
    }
}
