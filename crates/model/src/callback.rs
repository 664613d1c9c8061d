use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Opaque state round-tripped by CloudFormation between invocations of one operation.
///
/// Values are JSON primitives: flags, counters, timestamps and the occasional
/// serialized model. Keys cannot be removed: a step marked done stays done
/// for the rest of the operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackContext {
    values: BTreeMap<String, Value>,
}

impl CallbackContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Set a step marker. Markers are only ever set, never cleared.
    pub fn set_flag(&mut self, key: impl Into<String>) {
        self.insert(key, true);
    }

    pub fn flag(&self, key: &str) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn counter(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn set_counter(&mut self, key: impl Into<String>, value: u64) {
        self.insert(key, value);
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Read an RFC 3339 timestamp. Anything unparseable is treated as absent.
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw: &str = self.string(key)?;

        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc))
    }

    pub fn set_timestamp(&mut self, key: impl Into<String>, at: DateTime<Utc>) {
        self.insert(key, at.to_rfc3339());
    }
}
