//! `tracing` integration: forward events into a [`LogSink`].

use std::collections::BTreeSet;
use std::fmt;

use logbook_store::LogLevel;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::{LogRecord, LogSink};

/// Targets whose events never reach the sink. The sink and store log
/// about themselves under these; forwarding them would feed back.
const IGNORED_TARGETS: &[&str] = &["logbook_core", "logbook_store", "logbook::", "surrealdb"];

/// Layer turning tracing events into sink records.
///
/// Field handling:
/// - `message` becomes the record message
/// - `execution_id` / `script_name` come from the event or the nearest
///   enclosing span that carries them
/// - `tags` is split on commas
/// - `severity` overrides the tracing level (e.g. `severity = "SUCCESS"`)
/// - everything else lands in `extra_data`
pub struct SinkLayer {
    sink: LogSink,
}

impl SinkLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|prefix| target.starts_with(prefix))
}

fn map_level(level: &Level) -> LogLevel {
    match *level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warning,
        Level::ERROR => LogLevel::Error,
    }
}

/// Execution identity stored in span extensions.
#[derive(Debug, Default, Clone)]
struct ExecutionFields {
    execution_id: Option<String>,
    script_name: Option<String>,
}

impl ExecutionFields {
    fn is_empty(&self) -> bool {
        self.execution_id.is_none() && self.script_name.is_none()
    }
}

impl Visit for ExecutionFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "execution_id" => self.execution_id = Some(value.to_string()),
            "script_name" => self.script_name = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "execution_id" | "script_name" => self.record_str(field, &format!("{value:?}")),
            _ => {}
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    ids: ExecutionFields,
    tags: BTreeSet<String>,
    severity: Option<LogLevel>,
    extra: serde_json::Map<String, Value>,
}

impl EventFields {
    fn record_value(&mut self, field: &Field, value: Value) {
        let name = field.name();
        match name {
            "message" => self.message = Some(value_text(&value)),
            "execution_id" => self.ids.execution_id = Some(value_text(&value)),
            "script_name" => self.ids.script_name = Some(value_text(&value)),
            "tags" => self.tags.extend(
                value_text(&value)
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            ),
            "severity" => self.severity = value_text(&value).parse().ok(),
            // metadata fields added by tracing-log
            n if n.starts_with("log.") => {}
            _ => {
                self.extra.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, Value::String(format!("{value:?}")));
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = ExecutionFields::default();
        attrs.record(&mut fields);
        if fields.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<ExecutionFields>() {
            Some(fields) => values.record(fields),
            None => {
                let mut fields = ExecutionFields::default();
                values.record(&mut fields);
                if !fields.is_empty() {
                    extensions.insert(fields);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if is_ignored(meta.target()) {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if fields.ids.execution_id.is_some() && fields.ids.script_name.is_some() {
                    break;
                }
                let extensions = span.extensions();
                if let Some(found) = extensions.get::<ExecutionFields>() {
                    if fields.ids.execution_id.is_none() {
                        fields.ids.execution_id = found.execution_id.clone();
                    }
                    if fields.ids.script_name.is_none() {
                        fields.ids.script_name = found.script_name.clone();
                    }
                }
            }
        }

        let level = fields.severity.unwrap_or_else(|| map_level(meta.level()));
        let mut record = LogRecord::new(level, fields.message.unwrap_or_default());
        record.execution_id = fields.ids.execution_id;
        record.script_name = fields.ids.script_name;
        record.function_name = meta.module_path().map(str::to_string);
        record.file_path = meta.file().map(str::to_string);
        record.line_number = meta.line();
        record.extra_data = fields.extra;
        record.tags = fields.tags;

        self.sink.write(record);
    }
}
