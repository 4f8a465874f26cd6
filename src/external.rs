//! Forwarding entries to crash-reporting services.
//!
//! A [`CrashReporter`] is the runtime object of such a service (an SDK
//! client, an HTTP endpoint). [`CrashReporterSink`] adapts it to the
//! [`LogSink`] contract, shaping each entry the way the service expects.

use crate::entry::{ErrorInfo, Level, LogEntry};
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One exception report handed to a [`CrashReporter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrashReport {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub exception: ErrorInfo,
    pub tags: BTreeMap<String, String>,
    pub contexts: BTreeMap<String, Value>,
    pub extra: BTreeMap<String, Value>,
}

/// A crash-reporting service able to capture exceptions.
#[async_trait]
pub trait CrashReporter: Send + Sync {
    async fn capture(&self, report: CrashReport) -> Result<(), BoxError>;
}

/// Report layout of the target service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterFlavor {
    /// Session and component stack under `contexts.error_registry`,
    /// caller context under `contexts.custom`, metadata as `extra`.
    Sentry,
    /// Everything besides the tags goes into `extra`.
    LogRocket,
}

impl ReporterFlavor {
    fn name(&self) -> &'static str {
        match self {
            ReporterFlavor::Sentry => "sentry",
            ReporterFlavor::LogRocket => "logrocket",
        }
    }
}

/// [`LogSink`] that forwards every entry to a [`CrashReporter`].
#[derive(Clone)]
pub struct CrashReporterSink {
    flavor: ReporterFlavor,
    reporter: Arc<dyn CrashReporter>,
}

impl CrashReporterSink {
    pub fn new(flavor: ReporterFlavor, reporter: Arc<dyn CrashReporter>) -> Self {
        CrashReporterSink { flavor, reporter }
    }

    pub fn sentry(reporter: Arc<dyn CrashReporter>) -> Self {
        Self::new(ReporterFlavor::Sentry, reporter)
    }

    pub fn logrocket(reporter: Arc<dyn CrashReporter>) -> Self {
        Self::new(ReporterFlavor::LogRocket, reporter)
    }

    pub fn flavor(&self) -> ReporterFlavor {
        self.flavor
    }

    /// Shape `entry` as a report for this sink's service.
    pub fn map_entry(&self, entry: &LogEntry) -> CrashReport {
        let exception = entry
            .error()
            .cloned()
            .unwrap_or_else(|| ErrorInfo::from_message(entry.message()));

        let mut tags = BTreeMap::new();
        tags.insert("level".to_string(), entry.level().as_str().to_string());
        if let Some(component) = entry.context().component.as_deref() {
            tags.insert("component".to_string(), component.to_string());
        }

        let context = to_value(entry.context());
        let metadata = to_value(entry.metadata());

        let mut contexts = BTreeMap::new();
        let mut extra = BTreeMap::new();
        match self.flavor {
            ReporterFlavor::Sentry => {
                contexts.insert(
                    "error_registry".to_string(),
                    json!({
                        "sessionId": entry.session_id(),
                        "componentStack": entry.component_stack(),
                    }),
                );
                contexts.insert("custom".to_string(), context);
                if let Value::Object(map) = metadata {
                    extra.extend(map);
                }
            }
            ReporterFlavor::LogRocket => {
                extra.insert("sessionId".to_string(), json!(entry.session_id()));
                extra.insert("componentStack".to_string(), json!(entry.component_stack()));
                extra.insert("context".to_string(), context);
                extra.insert("metadata".to_string(), metadata);
            }
        }

        CrashReport {
            timestamp: entry.timestamp(),
            level: entry.level(),
            exception,
            tags,
            contexts,
            extra,
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[async_trait]
impl LogSink for CrashReporterSink {
    async fn send(&self, entry: &LogEntry) -> Result<(), BoxError> {
        self.reporter.capture(self.map_entry(entry)).await
    }

    fn name(&self) -> &str {
        self.flavor.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Annotations, LogRequest};

    struct Unused;

    #[async_trait]
    impl CrashReporter for Unused {
        async fn capture(&self, _report: CrashReport) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn entry() -> LogEntry {
        let request = LogRequest::new(Level::Error, "boom")
            .with_error(ErrorInfo::from_message("boom"))
            .with_component_stack("at LoginForm")
            .with_context(Annotations::new().with_component("LoginForm"))
            .with_metadata(Annotations::new().with("attempt", 3));
        LogEntry::build(request, Utc::now(), "session_1", None, None)
    }

    #[test]
    fn test_sentry_layout() {
        let report = CrashReporterSink::sentry(Arc::new(Unused)).map_entry(&entry());
        assert_eq!(report.tags["level"], "error");
        assert_eq!(report.tags["component"], "LoginForm");
        assert_eq!(report.contexts["error_registry"]["sessionId"], "session_1");
        assert_eq!(report.contexts["error_registry"]["componentStack"], "at LoginForm");
        assert_eq!(report.contexts["custom"]["component"], "LoginForm");
        assert_eq!(report.extra["attempt"], 3);
    }

    #[test]
    fn test_logrocket_layout() {
        let report = CrashReporterSink::logrocket(Arc::new(Unused)).map_entry(&entry());
        assert!(report.contexts.is_empty());
        assert_eq!(report.extra["sessionId"], "session_1");
        assert_eq!(report.extra["context"]["component"], "LoginForm");
        assert_eq!(report.extra["metadata"]["attempt"], 3);
    }

    #[test]
    fn test_message_only_entry_synthesizes_exception() {
        let plain = LogEntry::build(
            LogRequest::new(Level::Warning, "slow request"),
            Utc::now(),
            "session_1",
            None,
            None,
        );
        let report = CrashReporterSink::sentry(Arc::new(Unused)).map_entry(&plain);
        assert_eq!(report.exception, ErrorInfo::from_message("slow request"));
        assert_eq!(report.tags.get("component"), None);
    }
}
