//! Fact cache backed by a directory of JSON files, one per host.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::{CacheMetrics, FactCache, Facts};
use crate::error::{Error, Result};

/// File name for a host key: path separators, `%` and a leading dot are
/// percent-encoded so every key stays a single entry inside the cache dir
fn encode_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for (i, c) in key.chars().enumerate() {
        if matches!(c, '%' | '/' | '\\' | '\0') || (i == 0 && c == '.') {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                name.push_str(&format!("%{byte:02X}"));
            }
        } else {
            name.push(c);
        }
    }
    name
}

fn decode_key(name: &str) -> Option<String> {
    let raw = name.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

#[derive(Debug)]
pub struct JsonFileFactCache {
    dir: PathBuf,
    ttl: Option<Duration>,
    metrics: CacheMetrics,
}

impl JsonFileFactCache {
    /// Create the cache, making `dir` if needed
    pub fn new(dir: impl Into<PathBuf>, ttl: Option<Duration>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Cache(format!("error creating fact cache dir {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            ttl,
            metrics: CacheMetrics::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }

    fn is_expired(&self, path: &Path) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age > ttl)
    }

    fn remove_file(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Cache(format!(
                "error removing {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl FactCache for JsonFileFactCache {
    fn name(&self) -> &'static str {
        "jsonfile"
    }

    fn get(&self, key: &str) -> Result<Option<Facts>> {
        let path = self.path_for(key);
        if !path.is_file() {
            self.metrics.record_miss();
            return Ok(None);
        }
        if self.is_expired(&path) {
            debug!("Fact cache file {} expired", path.display());
            Self::remove_file(&path)?;
            self.metrics.record_expiration();
            self.metrics.record_miss();
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Cache(format!("error reading {}: {}", path.display(), e)))?;
        match serde_json::from_str::<Facts>(&content) {
            Ok(facts) => {
                self.metrics.record_hit();
                Ok(Some(facts))
            }
            Err(e) => {
                warn!("Removing corrupt fact cache file {}", path.display());
                Self::remove_file(&path)?;
                Err(Error::Cache(format!(
                    "error parsing fact cache file {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    fn set(&self, key: &str, value: Facts) -> Result<()> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(&value)?;
        fs::write(&path, content)
            .map_err(|e| Error::Cache(format!("error writing {}: {}", path.display(), e)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        Self::remove_file(&self.path_for(key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::Cache(format!("error listing {}: {}", self.dir.display(), e))
        })?;
        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || self.is_expired(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = decode_key(name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn flush(&self) -> Result<()> {
        for key in self.keys()? {
            self.delete(&key)?;
        }
        Ok(())
    }

    fn metrics(&self) -> Option<&CacheMetrics> {
        Some(&self.metrics)
    }
}
