//! File loading for playbooks, task lists, and inventory sources.
//!
//! The engine only needs structured data out of a path; [`YamlLoader`] reads
//! YAML (a superset of JSON) into `serde_json::Value` so that everything
//! downstream works with one value type.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::trace;

use crate::error::{Error, Result};

/// Loads structured data from files
pub trait Loader: Send + Sync + std::fmt::Debug {
    /// Parse a file into structured data
    fn load_file(&self, path: &Path) -> Result<JsonValue>;

    /// Read a file as text
    fn read_text(&self, path: &Path) -> Result<String>;

    /// Resolve a path relative to the loader's base directory
    fn path_dwim(&self, path: &Path) -> PathBuf;
}

/// YAML/JSON file loader rooted at a base directory
#[derive(Debug, Clone)]
pub struct YamlLoader {
    basedir: PathBuf,
}

impl Default for YamlLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl YamlLoader {
    /// Create a loader resolving relative paths against `basedir`
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
        }
    }

    /// Base directory for relative paths
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }
}

impl Loader for YamlLoader {
    fn load_file(&self, path: &Path) -> Result<JsonValue> {
        let content = self.read_text(path)?;
        trace!("Loaded {} bytes from {}", content.len(), path.display());
        if content.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_yaml::from_str(&content)
            .map_err(|e| Error::playbook(self.path_dwim(path), e.to_string()))
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        let full = self.path_dwim(path);
        if !full.exists() {
            return Err(Error::FileNotFound(full));
        }
        Ok(std::fs::read_to_string(full)?)
    }

    fn path_dwim(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.basedir.join(path)
        }
    }
}
