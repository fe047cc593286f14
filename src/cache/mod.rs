//! Fact caching.
//!
//! Facts gathered from hosts can outlive a run through a pluggable
//! [`FactCache`] backend, keyed by host name:
//!
//! - **memory**: process lifetime, TTL checked on read
//! - **jsonfile**: one JSON document per host in a directory, TTL from mtime
//!
//! A timeout of zero means entries never expire.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::config::FactCachingConfig;
use crate::error::{Error, Result};

pub mod jsonfile;
pub mod memory;

pub use jsonfile::JsonFileFactCache;
pub use memory::MemoryFactCache;

/// Facts for one host
pub type Facts = IndexMap<String, JsonValue>;

/// Storage for host facts
pub trait FactCache: Send + Sync + fmt::Debug {
    /// Backend name
    fn name(&self) -> &'static str;

    /// Facts for a host, `None` when absent or expired
    fn get(&self, key: &str) -> Result<Option<Facts>>;

    /// Store facts for a host, replacing what was there
    fn set(&self, key: &str, value: Facts) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<()>;

    /// Hosts with unexpired entries
    fn keys(&self) -> Result<Vec<String>>;

    /// Drop every entry
    fn flush(&self) -> Result<()>;

    /// Merge facts into a host's entry
    fn update(&self, key: &str, value: Facts) -> Result<()> {
        let mut current = self.get(key)?.unwrap_or_default();
        current.extend(value);
        self.set(key, current)
    }

    /// Hit and miss counters
    fn metrics(&self) -> Option<&CacheMetrics> {
        None
    }
}

/// Cache metrics for monitoring and diagnostics
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Entries dropped because they expired
    pub expirations: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Entry lifetime from a timeout in seconds, `None` for never
pub fn ttl_from_secs(timeout: u64) -> Option<Duration> {
    (timeout > 0).then(|| Duration::from_secs(timeout))
}

type CacheConstructor = fn(&FactCachingConfig) -> Result<Box<dyn FactCache>>;

/// Name to constructor map for cache backends
#[derive(Debug, Clone)]
pub struct FactCacheRegistry {
    constructors: HashMap<&'static str, CacheConstructor>,
}

impl Default for FactCacheRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register("memory", |config| {
            Ok(Box::new(MemoryFactCache::new(ttl_from_secs(config.timeout))))
        });
        registry.register("jsonfile", |config| {
            let dir = config.connection.clone().ok_or_else(|| {
                Error::Cache("the jsonfile backend requires 'connection' to be set".into())
            })?;
            Ok(Box::new(JsonFileFactCache::new(dir, ttl_from_secs(config.timeout))?))
        });
        registry
    }
}

impl FactCacheRegistry {
    pub fn register(&mut self, name: &'static str, constructor: CacheConstructor) {
        self.constructors.insert(name, constructor);
    }

    /// Build the configured backend
    pub fn create(&self, config: &FactCachingConfig) -> Result<Box<dyn FactCache>> {
        let constructor = self
            .constructors
            .get(config.backend.as_str())
            .ok_or_else(|| Error::Cache(format!("unknown fact cache backend '{}'", config.backend)))?;
        constructor(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_zero_never_expires() {
        assert_eq!(ttl_from_secs(0), None);
        assert_eq!(ttl_from_secs(60), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_registry() {
        let registry = FactCacheRegistry::default();
        let memory = registry.create(&FactCachingConfig::default()).unwrap();
        assert_eq!(memory.name(), "memory");

        let missing_dir = FactCachingConfig {
            backend: "jsonfile".into(),
            ..FactCachingConfig::default()
        };
        assert!(matches!(registry.create(&missing_dir), Err(Error::Cache(_))));

        let unknown = FactCachingConfig {
            backend: "redis".into(),
            ..FactCachingConfig::default()
        };
        assert!(registry.create(&unknown).is_err());
    }

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::default();
        assert_eq!(metrics.hit_rate(), 0.0);
        metrics.record_hit();
        metrics.record_miss();
        assert!((metrics.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
