//! In-process fact cache.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;

use super::{CacheMetrics, FactCache, Facts};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    facts: Facts,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Fact cache held in a concurrent map
#[derive(Debug, Default)]
pub struct MemoryFactCache {
    entries: DashMap<String, Entry>,
    ttl: Option<Duration>,
    metrics: CacheMetrics,
}

impl MemoryFactCache {
    /// `None` keeps entries forever
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            metrics: CacheMetrics::default(),
        }
    }
}

impl FactCache for MemoryFactCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Facts>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.metrics.record_hit();
                return Ok(Some(entry.facts.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            trace!("Fact cache entry for {} expired", key);
            self.entries.remove(key);
            self.metrics.record_expiration();
        }
        self.metrics.record_miss();
        Ok(None)
    }

    fn set(&self, key: &str, value: Facts) -> Result<()> {
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                facts: value,
                expires_at,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.entries.retain(|_, entry| !entry.is_expired());
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    fn flush(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn metrics(&self) -> Option<&CacheMetrics> {
        Some(&self.metrics)
    }
}
