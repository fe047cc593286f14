//! Per-host run statistics and custom stats.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Host key for custom stats that apply to the whole run
pub const RUN_STATS_KEY: &str = "_run";

/// Counters for one host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub ok: usize,
    pub changed: usize,
    pub failures: usize,
    pub unreachable: usize,
    pub skipped: usize,
    pub rescued: usize,
    pub ignored: usize,
}

/// Which counter to bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Ok,
    Changed,
    Failures,
    Unreachable,
    Skipped,
    Rescued,
    Ignored,
}

impl HostStats {
    fn counter(&mut self, kind: StatKind) -> &mut usize {
        match kind {
            StatKind::Ok => &mut self.ok,
            StatKind::Changed => &mut self.changed,
            StatKind::Failures => &mut self.failures,
            StatKind::Unreachable => &mut self.unreachable,
            StatKind::Skipped => &mut self.skipped,
            StatKind::Rescued => &mut self.rescued,
            StatKind::Ignored => &mut self.ignored,
        }
    }
}

/// Statistics for a whole run, in host processing order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    hosts: IndexMap<String, HostStats>,
    custom: IndexMap<String, JsonMap<String, JsonValue>>,
}

impl AggregateStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump one counter for a host
    pub fn increment(&mut self, kind: StatKind, host: &str) {
        *self
            .hosts
            .entry(host.to_string())
            .or_default()
            .counter(kind) += 1;
    }

    /// Lower one counter for a host, never below zero
    pub fn decrement(&mut self, kind: StatKind, host: &str) {
        if let Some(stats) = self.hosts.get_mut(host) {
            let counter = stats.counter(kind);
            *counter = counter.saturating_sub(1);
        }
    }

    /// Counters for a host, zeroes if it was never seen
    pub fn summarize(&self, host: &str) -> HostStats {
        self.hosts.get(host).copied().unwrap_or_default()
    }

    /// Hosts that have any recorded stats
    pub fn processed(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// Replace a custom stat; `None` host means the whole run
    pub fn set_custom_stats(&mut self, which: &str, what: JsonValue, host: Option<&str>) {
        self.custom
            .entry(host.unwrap_or(RUN_STATS_KEY).to_string())
            .or_default()
            .insert(which.to_string(), what);
    }

    /// Merge into a custom stat.
    ///
    /// Objects merge recursively, numbers add, strings and lists append.
    /// A value of a different type than the stored one is ignored.
    pub fn update_custom_stats(&mut self, which: &str, what: JsonValue, host: Option<&str>) {
        let entry = self
            .custom
            .entry(host.unwrap_or(RUN_STATS_KEY).to_string())
            .or_default();
        match entry.get_mut(which) {
            None => {
                entry.insert(which.to_string(), what);
            }
            Some(current) => accumulate(current, what),
        }
    }

    /// Custom stats for a host, or for the run with `None`
    pub fn custom_stats(&self, host: Option<&str>) -> Option<&JsonMap<String, JsonValue>> {
        self.custom.get(host.unwrap_or(RUN_STATS_KEY))
    }

    /// All custom stats keyed by host
    pub fn all_custom_stats(&self) -> &IndexMap<String, JsonMap<String, JsonValue>> {
        &self.custom
    }
}

fn accumulate(current: &mut JsonValue, what: JsonValue) {
    match (current, what) {
        (JsonValue::Object(cur), JsonValue::Object(new)) => merge_hash(cur, new),
        (JsonValue::Number(cur), JsonValue::Number(new)) => {
            let sum = match (cur.as_i64(), new.as_i64()) {
                (Some(a), Some(b)) => Some(serde_json::Number::from(a.saturating_add(b))),
                _ => serde_json::Number::from_f64(
                    cur.as_f64().unwrap_or_default() + new.as_f64().unwrap_or_default(),
                ),
            };
            if let Some(sum) = sum {
                *cur = sum;
            }
        }
        (JsonValue::String(cur), JsonValue::String(new)) => cur.push_str(&new),
        (JsonValue::Array(cur), JsonValue::Array(new)) => cur.extend(new),
        _ => {}
    }
}

fn merge_hash(into: &mut JsonMap<String, JsonValue>, from: JsonMap<String, JsonValue>) {
    for (key, value) in from {
        match (into.get_mut(&key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(new)) => merge_hash(existing, new),
            (_, value) => {
                into.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_increment_and_summarize() {
        let mut stats = AggregateStats::new();
        stats.increment(StatKind::Ok, "web1");
        stats.increment(StatKind::Ok, "web1");
        stats.increment(StatKind::Changed, "web1");
        stats.increment(StatKind::Unreachable, "web2");
        stats.decrement(StatKind::Ok, "web1");

        let web1 = stats.summarize("web1");
        assert_eq!(web1.ok, 1);
        assert_eq!(web1.changed, 1);
        assert_eq!(stats.summarize("web2").unreachable, 1);
        assert_eq!(stats.summarize("missing"), HostStats::default());
        assert_eq!(stats.processed().collect::<Vec<_>>(), vec!["web1", "web2"]);
    }

    #[test]
    fn test_custom_stats_aggregate() {
        let mut stats = AggregateStats::new();
        stats.update_custom_stats("count", json!(1), None);
        stats.update_custom_stats("count", json!(2), None);
        stats.update_custom_stats("names", json!(["a"]), Some("web1"));
        stats.update_custom_stats("names", json!(["b"]), Some("web1"));
        stats.update_custom_stats("tree", json!({"a": {"x": 1}}), None);
        stats.update_custom_stats("tree", json!({"a": {"y": 2}, "b": 3}), None);
        // mismatched type is ignored
        stats.update_custom_stats("count", json!("three"), None);

        let run = stats.custom_stats(None).unwrap();
        assert_eq!(run["count"], json!(3));
        assert_eq!(run["tree"], json!({"a": {"x": 1, "y": 2}, "b": 3}));
        assert_eq!(stats.custom_stats(Some("web1")).unwrap()["names"], json!(["a", "b"]));

        stats.set_custom_stats("count", json!(10), None);
        assert_eq!(stats.custom_stats(None).unwrap()["count"], json!(10));
    }
}
