// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoration hook applied to every event before its logging fields are populated.

use crate::event::Event;

/// Adds fields to every event.
///
/// Implementations must only add fields; they run on a partially built event and must leave
/// the fields already present untouched.
pub trait Decorator: Send + Sync {
    fn decorate(&self, event: &mut Event);
}

/// Adds a fixed set of `key: value` fields to every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDecorator {
    fields: Vec<(String, String)>,
}

impl FieldDecorator {
    #[must_use]
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Parses `key:value` pairs separated by commas and/or whitespace.
    ///
    /// Entries that are not exactly one `key:value` pair are ignored. A key given twice keeps
    /// its first value.
    #[must_use]
    pub fn from_field_string(fields: &str) -> Self {
        let normalized = fields.replace(',', " ");
        let mut fields: Vec<(String, String)> = Vec::new();

        for kv in normalized.split_whitespace() {
            let parts = kv.split(':').collect::<Vec<&str>>();
            if parts.len() != 2 || parts[0].is_empty() {
                continue;
            }
            if fields.iter().any(|(k, _)| k == parts[0]) {
                continue;
            }
            fields.push((parts[0].to_string(), parts[1].to_string()));
        }
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

impl Decorator for FieldDecorator {
    fn decorate(&self, event: &mut Event) {
        for (key, value) in &self.fields {
            event.set_if_absent(key, value.as_str());
        }
    }
}
