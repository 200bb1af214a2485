// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps decoded logging event objects into canonical events.
//!
//! Fields are populated in a fixed order, each later step overwriting keys set by an earlier
//! one:
//!
//! 1. `message`, then the decorator
//! 2. `host`, `path`, `priority`, `logger_name`, `thread`, `log_timestamp`
//! 3. `file`, `class`, `method` from the first caller data entry
//! 4. one field per MDC entry
//! 5. `stack_trace` when an exception is attached

use std::sync::Arc;

use serde_json::Value;

use crate::decoder::DecodedObject;
use crate::decorator::Decorator;
use crate::errors::MappingError;
use crate::event::{
    Event, CLASS, FILE, HOST, LOGGER_NAME, LOG_TIMESTAMP, MESSAGE, METHOD, PATH, PRIORITY,
    STACK_TRACE, THREAD,
};
use crate::logging_event::LoggingEvent;

#[derive(Clone)]
pub struct EventMapper {
    decorator: Arc<dyn Decorator>,
}

impl EventMapper {
    pub fn new(decorator: Arc<dyn Decorator>) -> Self {
        Self { decorator }
    }

    /// Builds the canonical event for one decoded object received from `host`.
    ///
    /// Fails only when a required field is missing, empty or wrongly typed; problems in the
    /// caller data, MDC or throwable sections leave those fields out instead.
    pub fn map(&self, object: DecodedObject, host: &str) -> Result<Event, MappingError> {
        let logging_event: LoggingEvent = serde_json::from_value(Value::Object(object))?;

        let message = logging_event
            .formatted()
            .filter(|m| !m.is_empty())
            .ok_or(MappingError::MissingField("formattedMessage"))?;
        let logger_name = required(logging_event.logger_name.as_deref(), "loggerName")?;
        let level = logging_event
            .level
            .as_ref()
            .and_then(|level| level.name())
            .ok_or(MappingError::MissingField("level"))?;
        let thread = required(logging_event.thread_name.as_deref(), "threadName")?;
        let timestamp = logging_event
            .time_stamp
            .ok_or(MappingError::MissingField("timeStamp"))?;

        let mut event = Event::new();
        event.set(MESSAGE, message);
        self.decorator.decorate(&mut event);
        event.set(HOST, host);
        event.set(PATH, logger_name);
        event.set(PRIORITY, level);
        event.set(LOGGER_NAME, logger_name);
        event.set(THREAD, thread);
        event.set(LOG_TIMESTAMP, timestamp);

        if let Some(caller) = logging_event.caller_data() {
            event.set(FILE, caller.location());
            event.set(CLASS, caller.class_name);
            event.set(METHOD, caller.method_name);
        }

        for (key, value) in logging_event.mdc_properties() {
            event.set(key, value);
        }

        if let Some(throwable) = logging_event.throwable() {
            event.set(STACK_TRACE, throwable.render());
        }

        Ok(event)
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, MappingError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(MappingError::MissingField(field))
}
