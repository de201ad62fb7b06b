//! Structured logger adapters: JSON lines and `tracing` forwarding.

use crate::log_sink::LogSink;
use kb_sync_domain::Timestamp;
use kb_sync_ports::{LogEvent, LogFields, LogLevel, LoggerPort};
use kb_sync_shared::redaction::{REDACTED, is_secret_key};
use serde_json::{Map, Value};
use std::sync::Arc;

/// JSON logger emitting one line per event.
#[derive(Clone)]
pub struct JsonLogger {
    sink: Arc<dyn LogSink>,
    base_fields: LogFields,
    min_level: LogLevel,
}

impl JsonLogger {
    /// Create a JSON logger backed by the provided sink.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            base_fields: LogFields::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Set base fields applied to every event.
    #[must_use]
    pub fn with_base_fields(mut self, fields: LogFields) -> Self {
        self.base_fields = fields;
        self
    }

    /// Set the minimum log level.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    fn render(&self, event: LogEvent) -> String {
        let fields = merged_fields(&self.base_fields, event.fields);
        let error = event.error.map(|mut value| {
            redact_value(&mut value);
            value
        });

        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_owned(),
            Value::String(Timestamp::now().to_rfc3339()),
        );
        payload.insert(
            "level".to_owned(),
            Value::String(event.level.as_str().to_owned()),
        );
        payload.insert("event".to_owned(), Value::String(event.event.into()));
        payload.insert("message".to_owned(), Value::String(event.message.into()));
        if !fields.is_empty() {
            payload.insert("fields".to_owned(), fields_to_json(fields));
        }
        if let Some(error) = error {
            payload.insert("error".to_owned(), error);
        }

        serde_json::to_string(&Value::Object(payload)).map_or_else(
            |_| {
                "{\"level\":\"error\",\"event\":\"logger.serialize_failed\",\"message\":\"log serialization failed\"}\n"
                    .to_owned()
            },
            |mut encoded| {
                encoded.push('\n');
                encoded
            },
        )
    }
}

impl LoggerPort for JsonLogger {
    fn log(&self, event: LogEvent) {
        if event.level < self.min_level {
            return;
        }
        let line = self.render(event);
        self.sink.write_line(&line);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut merged = self.base_fields.clone();
        merged.extend(fields);
        Box::new(Self {
            sink: Arc::clone(&self.sink),
            base_fields: merged,
            min_level: self.min_level,
        })
    }
}

/// Logger that forwards events into the `tracing` subscriber installed by the
/// binary. Fields are rendered as one redacted JSON object.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    base_fields: LogFields,
}

impl TracingLogger {
    /// Create a tracing-backed logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoggerPort for TracingLogger {
    fn log(&self, event: LogEvent) {
        let fields = merged_fields(&self.base_fields, event.fields);
        let fields = if fields.is_empty() {
            String::new()
        } else {
            fields_to_json(fields).to_string()
        };
        let error = event
            .error
            .map(|mut value| {
                redact_value(&mut value);
                value.to_string()
            })
            .unwrap_or_default();
        let name = event.event.as_ref();
        let message = event.message.as_ref();

        match event.level {
            LogLevel::Debug => {
                tracing::debug!(event = name, fields = %fields, error = %error, "{message}");
            },
            LogLevel::Info => {
                tracing::info!(event = name, fields = %fields, error = %error, "{message}");
            },
            LogLevel::Warn => {
                tracing::warn!(event = name, fields = %fields, error = %error, "{message}");
            },
            LogLevel::Error => {
                tracing::error!(event = name, fields = %fields, error = %error, "{message}");
            },
        }
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut merged = self.base_fields.clone();
        merged.extend(fields);
        Box::new(Self {
            base_fields: merged,
        })
    }
}

fn merged_fields(base: &LogFields, extra: Option<LogFields>) -> LogFields {
    let mut fields = base.clone();
    if let Some(extra) = extra {
        fields.extend(extra);
    }
    redact_fields(&mut fields);
    fields
}

fn fields_to_json(fields: LogFields) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key.into_string(), value))
            .collect(),
    )
}

fn redact_fields(fields: &mut LogFields) {
    for (key, value) in fields.iter_mut() {
        if is_secret_key(key) {
            *value = Value::String(REDACTED.to_owned());
        } else {
            redact_value(value);
        }
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if is_secret_key(key) {
                    *nested = Value::String(REDACTED.to_owned());
                } else {
                    redact_value(nested);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {},
    }
}
