//! The outcome of one task on one host.
//!
//! Actions return loosely shaped JSON. [`ResultPayload`] lifts the reserved
//! status keys (`changed`, `failed`, `skipped`, `unreachable`,
//! `failed_when_result`) and loop `results` into typed fields while keeping
//! everything else as data. A key that was never reported stays `None`, which
//! is what lets a looped result fall back to its items.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::playbook::Task;

/// Replacement payload for `no_log` results
pub const CENSORED_MESSAGE: &str =
    "the output has been hidden due to the fact that 'no_log: true' was specified for this result";

/// Keys that survive censoring
const PRESERVE_KEYS: [&str; 3] = ["attempts", "changed", "retries"];

const INTERNAL_PREFIX: &str = "_ansible_";

/// Structured action result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreachable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_when_result: Option<bool>,
    /// Per-item results of a looped task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ResultPayload>>,
    /// Everything else the action returned
    #[serde(default)]
    pub data: JsonMap<String, JsonValue>,
}

fn take_flag(map: &mut JsonMap<String, JsonValue>, key: &str) -> Option<bool> {
    match map.get(key)? {
        JsonValue::Bool(b) => {
            let b = *b;
            map.remove(key);
            Some(b)
        }
        JsonValue::String(s) => {
            let b = matches!(s.to_lowercase().as_str(), "true" | "yes" | "1");
            map.remove(key);
            Some(b)
        }
        JsonValue::Number(n) => {
            let b = n.as_i64().is_some_and(|n| n != 0);
            map.remove(key);
            Some(b)
        }
        _ => None,
    }
}

impl ResultPayload {
    /// Lift reserved keys out of a raw action result
    pub fn from_json(value: JsonValue) -> Self {
        let mut data = match value {
            JsonValue::Object(map) => map,
            JsonValue::Null => JsonMap::new(),
            other => {
                let mut map = JsonMap::new();
                map.insert("item".into(), other);
                map
            }
        };

        let items = match data.remove("results") {
            Some(JsonValue::Array(results)) => {
                Some(results.into_iter().map(Self::from_json).collect())
            }
            Some(other) => {
                data.insert("results".into(), other);
                None
            }
            None => None,
        };

        Self {
            changed: take_flag(&mut data, "changed"),
            failed: take_flag(&mut data, "failed"),
            skipped: take_flag(&mut data, "skipped"),
            unreachable: take_flag(&mut data, "unreachable"),
            failed_when_result: take_flag(&mut data, "failed_when_result"),
            items,
            data,
        }
    }

    /// Raw JSON form with reserved keys restored
    pub fn to_json(&self) -> JsonValue {
        let mut map = self.data.clone();
        for (key, flag) in [
            ("changed", self.changed),
            ("failed", self.failed),
            ("skipped", self.skipped),
            ("unreachable", self.unreachable),
            ("failed_when_result", self.failed_when_result),
        ] {
            if let Some(flag) = flag {
                map.insert(key.into(), JsonValue::Bool(flag));
            }
        }
        if let Some(items) = &self.items {
            map.insert(
                "results".into(),
                JsonValue::Array(items.iter().map(Self::to_json).collect()),
            );
        }
        JsonValue::Object(map)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        match key {
            "changed" => self.changed,
            "failed" => self.failed,
            "skipped" => self.skipped,
            "unreachable" => self.unreachable,
            "failed_when_result" => self.failed_when_result,
            _ => None,
        }
    }

    /// Top-level value when present, otherwise OR over items
    fn check_key(&self, key: &str) -> bool {
        if let Some(flag) = self.flag(key) {
            return flag;
        }
        self.items
            .iter()
            .flatten()
            .any(|item| item.flag(key).unwrap_or(false))
    }

    pub fn is_changed(&self) -> bool {
        self.check_key("changed")
    }

    pub fn is_unreachable(&self) -> bool {
        self.check_key("unreachable")
    }

    /// `failed_when_result` overrides `failed` when reported anywhere
    pub fn is_failed(&self) -> bool {
        let has_failed_when = self.failed_when_result.is_some()
            || self
                .items
                .iter()
                .flatten()
                .any(|item| item.failed_when_result.is_some());
        if has_failed_when {
            self.check_key("failed_when_result")
        } else {
            self.check_key("failed")
        }
    }

    /// Looped results are skipped only when every item was
    pub fn is_skipped(&self) -> bool {
        if let Some(items) = &self.items {
            if !items.is_empty() && items.iter().all(|i| i.skipped.unwrap_or(false)) {
                return true;
            }
        }
        self.skipped.unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.data.insert(key.into(), value);
    }
}

/// Immutable snapshot of (host, task, payload)
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub host: String,
    pub task: Arc<Task>,
    pub payload: ResultPayload,
}

impl TaskResult {
    pub fn new(host: impl Into<String>, task: Arc<Task>, raw: JsonValue) -> Self {
        Self {
            host: host.into(),
            task,
            payload: ResultPayload::from_json(raw),
        }
    }

    pub fn from_payload(host: impl Into<String>, task: Arc<Task>, payload: ResultPayload) -> Self {
        Self {
            host: host.into(),
            task,
            payload,
        }
    }

    pub fn is_changed(&self) -> bool {
        self.payload.is_changed()
    }

    pub fn is_failed(&self) -> bool {
        self.payload.is_failed()
    }

    pub fn is_skipped(&self) -> bool {
        self.payload.is_skipped()
    }

    pub fn is_unreachable(&self) -> bool {
        self.payload.is_unreachable()
    }

    pub fn is_no_log(&self) -> bool {
        self.task.no_log
            || self
                .payload
                .get("_ansible_no_log")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false)
    }

    /// Handler names this result asks to notify
    pub fn notified_handlers(&self) -> Vec<String> {
        match self.payload.get("_ansible_notify") {
            Some(JsonValue::Array(names)) => names
                .iter()
                .filter_map(JsonValue::as_str)
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `msg` of the result, if any
    pub fn msg(&self) -> Option<&str> {
        self.payload.get("msg").and_then(JsonValue::as_str)
    }

    /// Value stored by `register`: internal keys and `invocation` removed
    pub fn registered_value(&self) -> JsonValue {
        let mut value = self.payload.to_json();
        strip_internal_keys(&mut value);
        if let JsonValue::Object(map) = &mut value {
            map.remove("invocation");
        }
        value
    }

    /// Copy for display and storage, censored for `no_log`
    pub fn clean_copy(&self) -> JsonValue {
        if self.is_no_log() {
            let raw = self.payload.to_json();
            let mut censored = JsonMap::new();
            censored.insert("censored".into(), JsonValue::from(CENSORED_MESSAGE));
            for key in PRESERVE_KEYS {
                if let Some(value) = raw.get(key) {
                    censored.insert(key.into(), value.clone());
                }
            }
            return JsonValue::Object(censored);
        }
        self.registered_value()
    }
}

/// Remove `_ansible_*` keys at every depth
pub fn strip_internal_keys(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            map.retain(|k, _| !k.starts_with(INTERNAL_PREFIX));
            for v in map.values_mut() {
                strip_internal_keys(v);
            }
        }
        JsonValue::Array(items) => {
            for v in items {
                strip_internal_keys(v);
            }
        }
        _ => {}
    }
}
