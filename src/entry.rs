use chrono::{DateTime, Utc};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// Severity of a [`LogEntry`]. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Error, Level::Warning, Level::Info, Level::Debug];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "ERROR"),
            Level::Warning => write!(f, "WARNING"),
            Level::Info => write!(f, "INFO"),
            Level::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Snapshot of a failure object taken at log time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Capture an error, its `source()` chain and, when `RUST_BACKTRACE`
    /// enables it, a backtrace of the logging call site.
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let mut stack = String::new();
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str("caused by: ");
            stack.push_str(&cause.to_string());
            stack.push('\n');
            source = cause.source();
        }

        let backtrace = std::backtrace::Backtrace::capture();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            stack.push_str(&backtrace.to_string());
        }

        ErrorInfo {
            name: short_type_name(std::any::type_name::<E>()),
            message: error.to_string(),
            stack: if stack.is_empty() { None } else { Some(stack) },
        }
    }

    /// Synthesize an error when only a message is available.
    pub fn from_message(message: impl Into<String>) -> Self {
        ErrorInfo {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl Error for ErrorInfo {}

fn short_type_name(full: &str) -> String {
    // "std::io::error::Error" -> "Error", "dyn core::error::Error" -> "Error"
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Typed annotations attached to an entry as `context` or `metadata`.
///
/// A few fields are well known; anything else goes into `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set `key` to `value`. The well-known keys `component`, `action` and
    /// `correlationId` set their typed field instead of going into `extra`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let key = key.into();
        let value = value.into();
        let slot = match key.as_str() {
            "component" => &mut self.component,
            "action" => &mut self.action,
            "correlationId" => &mut self.correlation_id,
            _ => {
                self.extra.insert(key, value);
                return self;
            }
        };
        *slot = Some(match value {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.component.is_none()
            && self.action.is_none()
            && self.correlation_id.is_none()
            && self.extra.is_empty()
    }

    /// Overlay `other` on top of `self`. Fields set in `other` win.
    pub fn merge(mut self, other: Annotations) -> Self {
        if other.component.is_some() {
            self.component = other.component;
        }
        if other.action.is_some() {
            self.action = other.action;
        }
        if other.correlation_id.is_some() {
            self.correlation_id = other.correlation_id;
        }
        self.extra.extend(other.extra);
        self
    }
}

/// One recorded event. Immutable once built by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    id: String,
    timestamp: DateTime<Utc>,
    level: Level,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    context: Annotations,
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    metadata: Annotations,
    session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl LogEntry {
    pub(crate) fn build(
        request: LogRequest,
        timestamp: DateTime<Utc>,
        session_id: &str,
        user_agent: Option<String>,
        url: Option<String>,
    ) -> Self {
        LogEntry {
            id: generate_id("error", timestamp),
            timestamp,
            level: request.level,
            message: request.message,
            error: request.error,
            component_stack: request.component_stack,
            context: request.context,
            metadata: request.metadata,
            session_id: session_id.to_string(),
            user_agent,
            url,
            user_id: request.user_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn component_stack(&self) -> Option<&str> {
        self.component_stack.as_deref()
    }

    pub fn context(&self) -> &Annotations {
        &self.context
    }

    pub fn metadata(&self) -> &Annotations {
        &self.metadata
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Component tag from `context`, falling back to `metadata`.
    pub fn component(&self) -> Option<&str> {
        self.context
            .component
            .as_deref()
            .or(self.metadata.component.as_deref())
    }
}

/// The caller-supplied part of an entry. The registry fills in identity,
/// timestamp, session and ambient fields.
#[derive(Debug, Clone)]
pub struct LogRequest {
    pub level: Level,
    pub message: String,
    pub error: Option<ErrorInfo>,
    pub component_stack: Option<String>,
    pub context: Annotations,
    pub metadata: Annotations,
    pub user_id: Option<String>,
}

impl LogRequest {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogRequest {
            level,
            message: message.into(),
            error: None,
            component_stack: None,
            context: Annotations::default(),
            metadata: Annotations::default(),
            user_id: None,
        }
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_component_stack(mut self, stack: impl Into<String>) -> Self {
        self.component_stack = Some(stack.into());
        self
    }

    pub fn with_context(mut self, context: Annotations) -> Self {
        self.context = context;
        self
    }

    pub fn with_metadata(mut self, metadata: Annotations) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// `<prefix>_<unix-millis>_<9 lowercase alphanumerics>`
pub(crate) fn generate_id(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = Alphanumeric
        .sample_string(&mut rand::rng(), 9)
        .to_ascii_lowercase();
    format!("{}_{}_{}", prefix, at.timestamp_millis(), suffix)
}
