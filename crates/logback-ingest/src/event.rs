// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical event emitted for every decoded logging event.

use serde::Serialize;
use serde_json::{Map, Value};

pub const MESSAGE: &str = "message";
pub const HOST: &str = "host";
pub const PATH: &str = "path";
pub const PRIORITY: &str = "priority";
pub const LOGGER_NAME: &str = "logger_name";
pub const THREAD: &str = "thread";
pub const LOG_TIMESTAMP: &str = "log_timestamp";
pub const FILE: &str = "file";
pub const CLASS: &str = "class";
pub const METHOD: &str = "method";
pub const STACK_TRACE: &str = "stack_trace";

/// Flat, insertion-ordered set of named fields.
///
/// Keys are unique; setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Sets `key` only if no value is present yet. Returns whether the value was stored.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<Value>) -> bool {
        if self.fields.contains_key(key) {
            return false;
        }
        self.fields.insert(key.to_string(), value.into());
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites_in_place() {
        let mut event = Event::new();
        event.set(MESSAGE, "first");
        event.set(HOST, "10.0.0.1:1234");
        event.set(MESSAGE, "second");

        assert_eq!(event.len(), 2);
        assert_eq!(event.get_str(MESSAGE), Some("second"));
        let keys: Vec<&str> = event.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec![MESSAGE, HOST]);
    }

    #[test]
    fn test_set_if_absent() {
        let mut event = Event::new();
        event.set(MESSAGE, "kept");
        assert!(!event.set_if_absent(MESSAGE, "ignored"));
        assert!(event.set_if_absent("env", "prod"));
        assert_eq!(event.get_str(MESSAGE), Some("kept"));
        assert_eq!(event.get_str("env"), Some("prod"));
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let mut event = Event::new();
        event.set(MESSAGE, "hello");
        event.set(LOG_TIMESTAMP, 1_700_000_000_000_i64);

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"message":"hello","log_timestamp":1700000000000}"#);
    }
}
