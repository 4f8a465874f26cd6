use crate::entry::{Annotations, Level, LogEntry};
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

/// `tracing` target used for everything the console writes. The
/// [`RegistryLayer`](crate::layer::RegistryLayer) skips this target.
pub const CONSOLE_TARGET: &str = "error_registry::console";

/// Part of the pipeline that failed while handling an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage<'a> {
    /// Writing the persisted mirror.
    Persistence,
    /// Delivering to the named external sink.
    ExternalSink(&'a str),
    /// Handing the entry to the dispatch worker.
    Dispatch,
}

impl fmt::Display for PipelineStage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Persistence => write!(f, "persistent storage"),
            PipelineStage::ExternalSink(name) => write!(f, "external sink `{}`", name),
            PipelineStage::Dispatch => write!(f, "dispatch queue"),
        }
    }
}

/// Synchronous console output.
///
/// `emit` runs inside `log()` before it returns, so implementations must not
/// block. `pipeline_failure` is the only place telemetry failures surface.
pub trait Console: Send + Sync {
    fn emit(&self, entry: &LogEntry);

    fn pipeline_failure(&self, stage: PipelineStage<'_>, error: &(dyn Error + 'static));
}

/// Console backed by `tracing` events, one per entry, at the entry's level.
#[derive(Clone, Debug, Default)]
pub struct TracingConsole;

impl TracingConsole {
    pub fn new() -> Self {
        TracingConsole
    }
}

fn prefix(entry: &LogEntry) -> String {
    format!("[{}] [{}]", entry.timestamp().to_rfc3339(), entry.level())
}

fn annotations_json(annotations: &Annotations) -> String {
    serde_json::to_string(annotations).unwrap_or_else(|_| "{}".to_string())
}

impl Console for TracingConsole {
    fn emit(&self, entry: &LogEntry) {
        let prefix = prefix(entry);
        let context = annotations_json(entry.context());
        match entry.level() {
            Level::Error => {
                let error = entry.error().map(|e| e.to_string()).unwrap_or_default();
                let stack = entry
                    .error()
                    .and_then(|e| e.stack.as_deref())
                    .unwrap_or_default();
                tracing::error!(
                    target: CONSOLE_TARGET,
                    error = %error,
                    stack = %stack,
                    component_stack = %entry.component_stack().unwrap_or_default(),
                    context = %context,
                    metadata = %annotations_json(entry.metadata()),
                    "{} {}",
                    prefix,
                    entry.message()
                );
            }
            Level::Warning => {
                tracing::warn!(target: CONSOLE_TARGET, context = %context, "{} {}", prefix, entry.message());
            }
            Level::Info => {
                tracing::info!(target: CONSOLE_TARGET, context = %context, "{} {}", prefix, entry.message());
            }
            Level::Debug => {
                tracing::debug!(target: CONSOLE_TARGET, context = %context, "{} {}", prefix, entry.message());
            }
        }
    }

    fn pipeline_failure(&self, stage: PipelineStage<'_>, error: &(dyn Error + 'static)) {
        match stage {
            PipelineStage::Persistence => {
                tracing::warn!(target: CONSOLE_TARGET, error = %error, "Failed to store entry in {}", stage);
            }
            _ => {
                tracing::error!(target: CONSOLE_TARGET, error = %error, "Failed to log to {}", stage);
            }
        }
    }
}

/// Detailed development logger: every field of the entry in one event.
#[async_trait]
impl LogSink for TracingConsole {
    async fn send(&self, entry: &LogEntry) -> Result<(), BoxError> {
        let error = entry.error().map(|e| e.to_string()).unwrap_or_default();
        let detail = format!(
            "Error Registry: {}\n  error: {}\n  context: {}\n  metadata: {}\n  session id: {}\n  component stack: {}",
            entry.message(),
            error,
            annotations_json(entry.context()),
            annotations_json(entry.metadata()),
            entry.session_id(),
            entry.component_stack().unwrap_or("-"),
        );
        match entry.level() {
            Level::Error => tracing::error!(target: CONSOLE_TARGET, "{}", detail),
            Level::Warning => tracing::warn!(target: CONSOLE_TARGET, "{}", detail),
            Level::Info => tracing::info!(target: CONSOLE_TARGET, "{}", detail),
            Level::Debug => tracing::debug!(target: CONSOLE_TARGET, "{}", detail),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}
