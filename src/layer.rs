use crate::entry::{Annotations, ErrorInfo, Level, LogRequest};
use crate::registry::ErrorRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from these targets are produced by the registry itself.
const OWN_TARGET_PREFIX: &str = "error_registry";

/// `tracing_subscriber` layer that records events in an [`ErrorRegistry`].
///
/// By default only `WARN` and `ERROR` events are recorded. The event's
/// target becomes the entry's component, its fields go into the context,
/// and its source location into the metadata. A field recorded as an
/// error value (`error = &e as &dyn Error`) becomes the entry's error.
///
/// The layer holds the registry alive, so a registry installed through a
/// global subscriber keeps its dispatch worker running for the rest of
/// the process.
pub struct RegistryLayer {
    registry: Arc<ErrorRegistry>,
    min_level: tracing::Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Events turned into registry entries.
    pub recorded_events: Arc<AtomicU64>,
}

impl RegistryLayer {
    pub fn new(registry: Arc<ErrorRegistry>) -> Self {
        RegistryLayer {
            registry,
            min_level: tracing::Level::WARN,
            total_events: Arc::new(AtomicU64::new(0)),
            recorded_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Also record events down to `level`.
    pub fn with_min_level(mut self, level: tracing::Level) -> Self {
        self.min_level = level;
        self
    }
}

fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::INFO => Level::Info,
        _ => Level::Debug,
    }
}

impl<S> Layer<S> for RegistryLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if *meta.level() > self.min_level || meta.target().starts_with(OWN_TARGET_PREFIX) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let level = map_level(meta.level());
        let message = visitor
            .message
            .unwrap_or_else(|| meta.name().to_string());

        let mut context = Annotations::new().with_component(meta.target());
        for (key, value) in visitor.fields {
            context = context.with(key, value);
        }

        let mut metadata = Annotations::new();
        if let Some(module_path) = meta.module_path() {
            metadata = metadata.with("modulePath", module_path);
        }
        if let Some(file) = meta.file() {
            metadata = metadata.with("file", file);
        }
        if let Some(line) = meta.line() {
            metadata = metadata.with("line", line);
        }

        let mut request = LogRequest::new(level, message.clone())
            .with_context(context)
            .with_metadata(metadata);
        match visitor.error {
            Some(error) => request = request.with_error(error),
            None if level == Level::Error => {
                request = request.with_error(ErrorInfo::from_message(message))
            }
            None => {}
        }

        if self.registry.log(request).entry_id().is_some() {
            self.recorded_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Collects an event's fields into JSON values.
#[derive(Default)]
pub struct FieldVisitor {
    pub message: Option<String>,
    pub error: Option<ErrorInfo>,
    pub fields: BTreeMap<String, Value>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if self.error.is_none() {
            self.error = Some(ErrorInfo::from_error(value));
        }
        self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}
