// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Known schema of a serialized logback logging event.
//!
//! Field names follow logback's `LoggingEventVO`. Required fields are typed strictly so that
//! a wrongly typed value rejects the whole record; the optional sections (caller data, MDC,
//! throwable) stay as raw values and are parsed best-effort by their accessors.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Rendered in place of a missing source file name.
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

// java.lang.StackTraceElement marks native frames with this line number.
const NATIVE_METHOD_LINE: i64 = -2;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingEvent {
    pub thread_name: Option<String>,
    pub logger_name: Option<String>,
    pub level: Option<Level>,
    pub formatted_message: Option<String>,
    pub message: Option<Value>,
    pub argument_array: Option<Value>,
    pub time_stamp: Option<i64>,
    pub caller_data_array: Option<Value>,
    pub mdc_property_map: Option<Value>,
    pub throwable_proxy: Option<Value>,
}

/// Logging level, sent either by name or by logback's integer code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Level {
    Name(String),
    Code(i64),
}

impl Level {
    /// Level name, or `None` for an empty name or an unknown code.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Level::Name(name) if name.is_empty() => None,
            Level::Name(name) => Some(name.as_str()),
            Level::Code(code) => level_name(*code),
        }
    }
}

fn level_name(code: i64) -> Option<&'static str> {
    match code {
        c if c == i64::from(i32::MIN) => Some("ALL"),
        5_000 => Some("TRACE"),
        10_000 => Some("DEBUG"),
        20_000 => Some("INFO"),
        30_000 => Some("WARN"),
        40_000 => Some("ERROR"),
        c if c == i64::from(i32::MAX) => Some("OFF"),
        _ => None,
    }
}

/// First entry of the caller data array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerData {
    pub file_name: Option<String>,
    pub line_number: i64,
    pub class_name: String,
    pub method_name: String,
}

impl CallerData {
    /// `<file>:<line>`
    #[must_use]
    pub fn location(&self) -> String {
        format!(
            "{}:{}",
            self.file_name.as_deref().unwrap_or(UNKNOWN_SOURCE),
            self.line_number
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrowableProxy {
    pub class_name: String,
    pub message: Option<String>,
    #[serde(default)]
    pub stack_trace_element_proxy_array: Vec<Value>,
}

/// One stack frame: either already rendered by the sender or a structured element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StackFrame {
    Rendered(String),
    Element(StackTraceElement),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceElement {
    pub class_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    pub line_number: i64,
}

impl StackFrame {
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            StackFrame::Rendered(line) => line.clone(),
            StackFrame::Element(element) => {
                let source = match (element.file_name.as_deref(), element.line_number) {
                    (_, NATIVE_METHOD_LINE) => "Native Method".to_string(),
                    (Some(file), line) if line >= 0 => format!("{file}:{line}"),
                    (Some(file), _) => file.to_string(),
                    (None, _) => UNKNOWN_SOURCE.to_string(),
                };
                format!(
                    "at {}.{}({})",
                    element.class_name, element.method_name, source
                )
            }
        }
    }
}

impl ThrowableProxy {
    /// `<class>: <message>` followed by one line per frame, in the order they were sent.
    ///
    /// Frames that cannot be parsed are skipped.
    #[must_use]
    pub fn render(&self) -> String {
        let mut trace = format!(
            "{}: {}",
            self.class_name,
            self.message.as_deref().unwrap_or("null")
        );
        for frame in &self.stack_trace_element_proxy_array {
            match StackFrame::deserialize(frame) {
                Ok(frame) => {
                    trace.push('\n');
                    trace.push_str(&frame.render());
                }
                Err(e) => debug!("Skipping unreadable stack frame: {}", e),
            }
        }
        trace
    }
}

impl LoggingEvent {
    /// The formatted message, rendering `message` with its arguments when the sender did
    /// not include a preformatted one.
    #[must_use]
    pub fn formatted(&self) -> Option<String> {
        if let Some(formatted) = self.formatted_message.as_ref() {
            return Some(formatted.clone());
        }
        let pattern = match self.message.as_ref()? {
            Value::String(pattern) => pattern,
            Value::Null => return None,
            other => {
                debug!("Ignoring message pattern that is not a string: {}", other);
                return None;
            }
        };
        let args = match self.argument_array.as_ref() {
            Some(Value::Array(args)) => args.as_slice(),
            None | Some(Value::Null) => &[],
            Some(other) => {
                debug!("Ignoring arguments that are not an array: {}", other);
                &[]
            }
        };
        Some(format_message(pattern, args))
    }

    /// Caller data, if the sender attached at least one entry.
    #[must_use]
    pub fn caller_data(&self) -> Option<CallerData> {
        let first = match self.caller_data_array.as_ref()? {
            Value::Array(entries) => entries.first()?,
            Value::Null => return None,
            other => {
                debug!("Ignoring caller data that is not an array: {}", other);
                return None;
            }
        };
        CallerData::deserialize(first)
            .map_err(|e| debug!("Ignoring unreadable caller data: {}", e))
            .ok()
    }

    /// MDC entries in the order they were sent. Non-string scalars are rendered as JSON text
    /// and null values are skipped.
    #[must_use]
    pub fn mdc_properties(&self) -> Vec<(String, String)> {
        let Some(Value::Object(map)) = self.mdc_property_map.as_ref() else {
            return Vec::new();
        };
        map.iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key.clone(), s.clone())),
                other => Some((key.clone(), other.to_string())),
            })
            .collect()
    }

    /// Whether the sender reported an attached exception.
    #[must_use]
    pub fn has_throwable(&self) -> bool {
        matches!(self.throwable_proxy, Some(ref v) if !v.is_null())
    }

    #[must_use]
    pub fn throwable(&self) -> Option<ThrowableProxy> {
        let value = self.throwable_proxy.as_ref().filter(|v| !v.is_null())?;
        ThrowableProxy::deserialize(value)
            .map_err(|e| debug!("Ignoring unreadable throwable proxy: {}", e))
            .ok()
    }
}

/// Substitutes `{}` placeholders in `pattern` with `args`, following SLF4J's rules.
///
/// `\{}` is a literal `{}`, `\\{}` is a literal backslash followed by a substitution, and
/// placeholders beyond the last argument are left as they are.
#[must_use]
pub fn format_message(pattern: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut args = args.iter();
    let mut rest = pattern;

    while !args.as_slice().is_empty() {
        let Some(idx) = rest.find("{}") else {
            break;
        };
        let before = &rest[..idx];
        let escaped = before.ends_with('\\');
        let double_escaped = before.ends_with("\\\\");

        if escaped && !double_escaped {
            out.push_str(&before[..before.len() - 1]);
            out.push_str("{}");
            rest = &rest[idx + 2..];
            continue;
        }

        let Some(arg) = args.next() else {
            break;
        };
        if double_escaped {
            out.push_str(&before[..before.len() - 1]);
        } else {
            out.push_str(before);
        }
        push_argument(&mut out, arg);
        rest = &rest[idx + 2..];
    }

    out.push_str(rest);
    out
}

fn push_argument(out: &mut String, arg: &Value) {
    match arg {
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_level_names_and_codes() {
        assert_eq!(Level::Name("WARN".into()).name(), Some("WARN"));
        assert_eq!(Level::Name(String::new()).name(), None);
        assert_eq!(Level::Code(20_000).name(), Some("INFO"));
        assert_eq!(Level::Code(i64::from(i32::MIN)).name(), Some("ALL"));
        assert_eq!(Level::Code(i64::from(i32::MAX)).name(), Some("OFF"));
        assert_eq!(Level::Code(42).name(), None);
    }

    #[test]
    fn test_level_deserializes_untagged() {
        let event: LoggingEvent = serde_json::from_value(json!({ "level": 40000 })).unwrap();
        assert_eq!(event.level, Some(Level::Code(40_000)));
        let event: LoggingEvent = serde_json::from_value(json!({ "level": "DEBUG" })).unwrap();
        assert_eq!(event.level, Some(Level::Name("DEBUG".into())));
    }

    #[test]
    fn test_format_message() {
        let args = [json!("alice"), json!(3), json!(null)];
        assert_eq!(
            format_message("user {} has {} items, extra {}", &args),
            "user alice has 3 items, extra null"
        );
        assert_eq!(format_message("{} and {}", &[json!(1)]), "1 and {}");
        assert_eq!(format_message("literal \\{} then {}", &[json!("x")]), "literal {} then x");
        assert_eq!(format_message("path C:\\\\{}", &[json!("dir")]), "path C:\\dir");
        assert_eq!(format_message("no placeholders", &[json!(1)]), "no placeholders");
    }

    #[test]
    fn test_format_message_leaves_tail_verbatim_without_arguments() {
        assert_eq!(format_message("a \\{}", &[]), "a \\{}");
        assert_eq!(format_message("{} then \\{}", &[json!(1)]), "1 then \\{}");
        assert_eq!(format_message("\\{} {}", &[json!("x")]), "{} x");
    }

    #[test]
    fn test_formatted_prefers_preformatted_message() {
        let event: LoggingEvent = serde_json::from_value(json!({
            "formattedMessage": "done",
            "message": "{}",
            "argumentArray": ["ignored"],
        }))
        .unwrap();
        assert_eq!(event.formatted().as_deref(), Some("done"));

        let event: LoggingEvent = serde_json::from_value(json!({
            "message": "took {} ms",
            "argumentArray": [12],
        }))
        .unwrap();
        assert_eq!(event.formatted().as_deref(), Some("took 12 ms"));

        let event: LoggingEvent = serde_json::from_value(json!({
            "message": "took {} ms",
            "argumentArray": "12",
        }))
        .unwrap();
        assert_eq!(event.formatted().as_deref(), Some("took {} ms"));

        let event: LoggingEvent = serde_json::from_value(json!({ "message": 12 })).unwrap();
        assert_eq!(event.formatted(), None);
    }

    #[test]
    fn test_caller_data_uses_first_entry() {
        let event: LoggingEvent = serde_json::from_value(json!({
            "callerDataArray": [
                { "fileName": "App.java", "lineNumber": 42, "className": "com.example.App", "methodName": "run" },
                { "fileName": "Main.java", "lineNumber": 7, "className": "com.example.Main", "methodName": "main" },
            ],
        }))
        .unwrap();
        let caller = event.caller_data().unwrap();
        assert_eq!(caller.location(), "App.java:42");
        assert_eq!(caller.class_name, "com.example.App");
        assert_eq!(caller.method_name, "run");
    }

    #[test]
    fn test_caller_data_absent_or_empty() {
        let event: LoggingEvent =
            serde_json::from_value(json!({ "callerDataArray": [] })).unwrap();
        assert!(event.caller_data().is_none());
        assert!(LoggingEvent::default().caller_data().is_none());

        let event: LoggingEvent =
            serde_json::from_value(json!({ "callerDataArray": [{ "lineNumber": 1 }] })).unwrap();
        assert!(event.caller_data().is_none());
    }

    #[test]
    fn test_mdc_properties_keep_order() {
        let event: LoggingEvent = serde_json::from_value(json!({
            "mdcPropertyMap": { "zeta": "1", "alpha": "2", "count": 3, "gone": null },
        }))
        .unwrap();
        assert_eq!(
            event.mdc_properties(),
            vec![
                ("zeta".to_string(), "1".to_string()),
                ("alpha".to_string(), "2".to_string()),
                ("count".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_stack_frame_rendering() {
        let frame = |file: Option<&str>, line: i64| {
            StackFrame::Element(StackTraceElement {
                class_name: "com.example.App".into(),
                method_name: "run".into(),
                file_name: file.map(str::to_string),
                line_number: line,
            })
            .render()
        };
        assert_eq!(frame(Some("App.java"), 10), "at com.example.App.run(App.java:10)");
        assert_eq!(frame(Some("App.java"), -1), "at com.example.App.run(App.java)");
        assert_eq!(frame(None, 10), "at com.example.App.run(Unknown Source)");
        assert_eq!(frame(Some("App.java"), -2), "at com.example.App.run(Native Method)");
    }

    #[test]
    fn test_throwable_render() {
        let event: LoggingEvent = serde_json::from_value(json!({
            "throwableProxy": {
                "className": "java.lang.IllegalStateException",
                "message": "boom",
                "stackTraceElementProxyArray": [
                    "at com.example.App.run(App.java:10)",
                    { "className": "com.example.Main", "methodName": "main", "fileName": "Main.java", "lineNumber": 5 },
                    42,
                ],
            },
        }))
        .unwrap();
        assert!(event.has_throwable());
        assert_eq!(
            event.throwable().unwrap().render(),
            "java.lang.IllegalStateException: boom\n\
             at com.example.App.run(App.java:10)\n\
             at com.example.Main.main(Main.java:5)"
        );
    }

    #[test]
    fn test_throwable_without_message_or_frames() {
        let event: LoggingEvent = serde_json::from_value(json!({
            "throwableProxy": { "className": "java.lang.NullPointerException" },
        }))
        .unwrap();
        assert_eq!(
            event.throwable().unwrap().render(),
            "java.lang.NullPointerException: null"
        );

        let event: LoggingEvent =
            serde_json::from_value(json!({ "throwableProxy": null })).unwrap();
        assert!(!event.has_throwable());
        assert!(event.throwable().is_none());
    }

    proptest! {
        #[test]
        fn prop_pattern_without_placeholders_is_unchanged(pattern in "[^{}\\\\]*", n in 0usize..4) {
            let args = vec![json!("arg"); n];
            prop_assert_eq!(format_message(&pattern, &args), pattern);
        }

        #[test]
        fn prop_each_placeholder_consumes_one_argument(words in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let pattern = vec!["{}"; words.len()].join(" ");
            let args: Vec<Value> = words.iter().map(|w| json!(w)).collect();
            prop_assert_eq!(format_message(&pattern, &args), words.join(" "));
        }
    }
}
