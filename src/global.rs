//! Process-wide capture of failures nobody else observed.
//!
//! [`FailureHub`] is the notification point: Rust panics (through a panic
//! hook) and failed detached tasks are turned into [`FailureEvent`]s and
//! fanned out to listeners. [`GlobalHandler`] subscribes the registry to it.

use crate::entry::{Annotations, ErrorInfo};
use crate::monitor::{MemoryProbe, MonitorThresholds, Monitors};
use crate::registry::ErrorRegistry;
use crate::sink::in_sink_delivery;
use parking_lot::Mutex;
use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, Weak};
use tokio::task::JoinHandle;

/// Classes of failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Uncaught,
    UnhandledRejection,
}

/// A failure that escaped to the top of a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct UncaughtFailure {
    pub message: String,
    pub error: Option<ErrorInfo>,
    pub filename: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl UncaughtFailure {
    pub fn from_message(message: impl Into<String>) -> Self {
        UncaughtFailure {
            message: message.into(),
            error: None,
            filename: None,
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, filename: impl Into<String>, line: u32, column: u32) -> Self {
        self.filename = Some(filename.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

/// Why a detached task failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    Error(ErrorInfo),
    /// Anything that is not an error value, rendered as text.
    Value(String),
}

impl RejectionReason {
    fn describe(&self) -> String {
        match self {
            RejectionReason::Error(info) => info.to_string(),
            RejectionReason::Value(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureEvent {
    Uncaught(UncaughtFailure),
    UnhandledRejection(RejectionReason),
}

impl FailureEvent {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureEvent::Uncaught(_) => FailureKind::Uncaught,
            FailureEvent::UnhandledRejection(_) => FailureKind::UnhandledRejection,
        }
    }
}

type Listener = Arc<dyn Fn(&FailureEvent) + Send + Sync>;

/// Fan-out point for [`FailureEvent`]s.
pub struct FailureHub {
    listeners: Mutex<Vec<(FailureKind, Listener)>>,
    panic_hook: Once,
    panic_hook_installed: AtomicBool,
    handler_attached: AtomicBool,
}

impl FailureHub {
    pub fn new() -> Arc<Self> {
        Arc::new(FailureHub {
            listeners: Mutex::new(Vec::new()),
            panic_hook: Once::new(),
            panic_hook_installed: AtomicBool::new(false),
            handler_attached: AtomicBool::new(false),
        })
    }

    pub fn add_listener<F>(&self, kind: FailureKind, listener: F)
    where
        F: Fn(&FailureEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push((kind, Arc::new(listener)));
    }

    /// Whether a [`GlobalHandler`] has registered its listeners here.
    pub fn has_handler(&self) -> bool {
        self.handler_attached.load(Ordering::Acquire)
    }

    /// Claim the single handler slot. Only the first caller gets `true`.
    fn attach_handler(&self) -> bool {
        self.handler_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn listener_count(&self, kind: FailureKind) -> usize {
        self.listeners.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Deliver `event` to every listener of its kind. Returns how many
    /// listeners were called.
    pub fn emit(&self, event: FailureEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &targets {
            listener(&event);
        }
        targets.len()
    }

    /// Report panics as [`FailureEvent::Uncaught`], then run the previously
    /// installed hook. Only the first call per hub installs anything.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let hub: Weak<FailureHub> = Arc::downgrade(self);
        self.panic_hook.call_once(|| {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                // Sink panics are reported by the registry worker itself.
                if in_sink_delivery() {
                    previous(info);
                    return;
                }
                if let Some(hub) = hub.upgrade() {
                    let message = info
                        .payload()
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| info.payload().downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic with non-string payload".to_string());
                    let mut failure = UncaughtFailure::from_message(message);
                    if let Some(location) = info.location() {
                        failure = failure.at(location.file(), location.line(), location.column());
                    }
                    hub.emit(FailureEvent::Uncaught(failure));
                }
                previous(info);
            }));
            self.panic_hook_installed.store(true, Ordering::Release);
        });
    }

    /// Spawn a detached task whose failure is reported as an
    /// [`FailureEvent::UnhandledRejection`].
    ///
    /// An `Err` outcome is always reported. A panic is reported here only
    /// when the panic hook is not installed, since the hook already saw it.
    pub fn spawn<F, T, E>(self: &Arc<Self>, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Error + Send + 'static,
    {
        let hub = Arc::clone(self);
        let inner = tokio::spawn(future);
        tokio::spawn(async move {
            match inner.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    hub.emit(FailureEvent::UnhandledRejection(RejectionReason::Error(
                        ErrorInfo::from_error(&e),
                    )));
                }
                Err(join_error) if join_error.is_panic() => {
                    if !hub.panic_hook_installed.load(Ordering::Acquire) {
                        hub.emit(FailureEvent::UnhandledRejection(RejectionReason::Value(
                            join_error.to_string(),
                        )));
                    }
                }
                Err(_) => {}
            }
        })
    }
}

/// Subscribes an [`ErrorRegistry`] to a [`FailureHub`].
///
/// Two states: not initialized and initialized. [`initialize`](Self::initialize)
/// moves between them once; later calls are no-ops. A hub accepts a single
/// handler, so initializing a second handler on the same hub is a no-op too.
pub struct GlobalHandler {
    registry: Arc<ErrorRegistry>,
    hub: Arc<FailureHub>,
    initialized: AtomicBool,
    thresholds: MonitorThresholds,
}

impl GlobalHandler {
    pub fn new(registry: Arc<ErrorRegistry>, hub: Arc<FailureHub>) -> Self {
        GlobalHandler {
            registry,
            hub,
            initialized: AtomicBool::new(false),
            thresholds: MonitorThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: MonitorThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Register one listener per failure kind. Returns `true` if this call
    /// did the registration, `false` if this handler or another one already
    /// holds the hub.
    pub fn initialize(&self) -> bool {
        if self.is_initialized() || !self.hub.attach_handler() {
            return false;
        }
        self.initialized.store(true, Ordering::Release);

        let registry = Arc::downgrade(&self.registry);
        self.hub.add_listener(FailureKind::Uncaught, move |event| {
            if let (Some(registry), FailureEvent::Uncaught(failure)) = (registry.upgrade(), event) {
                handle_uncaught(&registry, failure);
            }
        });

        let registry = Arc::downgrade(&self.registry);
        self.hub.add_listener(FailureKind::UnhandledRejection, move |event| {
            if let (Some(registry), FailureEvent::UnhandledRejection(reason)) =
                (registry.upgrade(), event)
            {
                handle_rejection(&registry, reason);
            }
        });

        let mut context = Annotations::new();
        if let Some(agent) = &self.registry.config().user_agent {
            context = context.with("userAgent", agent.clone());
        }
        self.registry
            .log_info("Global error handler initialized", Some(context), None);
        true
    }

    /// [`initialize`](Self::initialize), plus the advisory monitors. When
    /// a memory probe is given, a sampler task checks it periodically for
    /// as long as the returned [`Monitors`] lives.
    pub fn initialize_with_monitoring(&self, memory_probe: Option<Arc<dyn MemoryProbe>>) -> Monitors {
        self.initialize();

        let mut monitors = Monitors::new(Arc::clone(&self.registry), self.thresholds.clone());
        let mut features = vec!["performance", "network"];
        if let Some(probe) = memory_probe {
            monitors.start_memory_sampler(probe);
            features.push("memory");
        }

        self.registry.log_info(
            "Enhanced error monitoring initialized",
            Some(Annotations::new().with("features", features)),
            None,
        );
        monitors
    }
}

fn handle_uncaught(registry: &ErrorRegistry, failure: &UncaughtFailure) {
    let error = failure
        .error
        .clone()
        .unwrap_or_else(|| ErrorInfo::from_message(failure.message.clone()));

    let mut context = Annotations::new().with("source", "uncaught");
    if let Some(filename) = &failure.filename {
        context = context.with("filename", filename.clone());
    }
    if let Some(line) = failure.line {
        context = context.with("lineno", line);
    }
    if let Some(column) = failure.column {
        context = context.with("colno", column);
    }

    registry.log_error_info(error, Some(context), None);
}

fn handle_rejection(registry: &ErrorRegistry, reason: &RejectionReason) {
    let error = match reason {
        RejectionReason::Error(info) => info.clone(),
        RejectionReason::Value(value) => {
            ErrorInfo::from_message(format!("Unhandled rejection: {}", value))
        }
    };
    registry.log_error_info(
        error,
        Some(Annotations::new().with("source", "unhandled-rejection")),
        Some(Annotations::new().with("reason", reason.describe())),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::entry::Level;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> Arc<ErrorRegistry> {
        ErrorRegistry::builder(RegistryConfig::default().with_console_logging(false))
            .build()
            .0
    }

    #[derive(Debug)]
    struct Refused;

    impl std::fmt::Display for Refused {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "connection refused")
        }
    }

    impl Error for Refused {}

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let registry = registry();
        let hub = FailureHub::new();
        let handler = GlobalHandler::new(Arc::clone(&registry), Arc::clone(&hub));

        assert!(handler.initialize());
        assert!(!handler.initialize());
        assert!(handler.is_initialized());
        assert_eq!(hub.listener_count(FailureKind::Uncaught), 1);
        assert_eq!(hub.listener_count(FailureKind::UnhandledRejection), 1);
        assert_eq!(registry.entries(Some(Level::Info)).len(), 1);
    }

    #[tokio::test]
    async fn test_second_handler_on_same_hub_is_noop() {
        let registry = registry();
        let hub = FailureHub::new();
        let first = GlobalHandler::new(Arc::clone(&registry), Arc::clone(&hub));
        let second = GlobalHandler::new(Arc::clone(&registry), Arc::clone(&hub));

        assert!(first.initialize());
        assert!(!second.initialize());
        assert!(!second.is_initialized());
        assert!(hub.has_handler());
        assert_eq!(hub.listener_count(FailureKind::Uncaught), 1);
        assert_eq!(hub.listener_count(FailureKind::UnhandledRejection), 1);
    }

    #[tokio::test]
    async fn test_uncaught_with_location() {
        let registry = registry();
        let hub = FailureHub::new();
        GlobalHandler::new(Arc::clone(&registry), Arc::clone(&hub)).initialize();

        hub.emit(FailureEvent::Uncaught(
            UncaughtFailure::from_message("index out of bounds").at("src/grid.rs", 12, 7),
        ));

        let errors = registry.entries(Some(Level::Error));
        assert_eq!(errors.len(), 1);
        let entry = &errors[0];
        assert_eq!(entry.message(), "index out of bounds");
        assert_eq!(entry.context().get("source"), Some(&serde_json::json!("uncaught")));
        assert_eq!(entry.context().get("filename"), Some(&serde_json::json!("src/grid.rs")));
        assert_eq!(entry.context().get("lineno"), Some(&serde_json::json!(12)));
        assert_eq!(entry.context().get("colno"), Some(&serde_json::json!(7)));
    }

    #[tokio::test]
    async fn test_rejection_wraps_non_error_reason() {
        let registry = registry();
        let hub = FailureHub::new();
        GlobalHandler::new(Arc::clone(&registry), Arc::clone(&hub)).initialize();

        hub.emit(FailureEvent::UnhandledRejection(RejectionReason::Value(
            "42".to_string(),
        )));

        let entry = &registry.entries(Some(Level::Error))[0];
        assert_eq!(entry.message(), "Unhandled rejection: 42");
        assert_eq!(
            entry.context().get("source"),
            Some(&serde_json::json!("unhandled-rejection"))
        );
        assert_eq!(entry.metadata().get("reason"), Some(&serde_json::json!("42")));
    }

    #[tokio::test]
    async fn test_spawned_task_error_is_reported() {
        let registry = registry();
        let hub = FailureHub::new();
        GlobalHandler::new(Arc::clone(&registry), Arc::clone(&hub)).initialize();

        hub.spawn(async { Err::<(), _>(Refused) }).await.unwrap();

        let entry = &registry.entries(Some(Level::Error))[0];
        assert_eq!(entry.message(), "connection refused");
        assert_eq!(entry.error().unwrap().name, "Refused");
    }

    #[test]
    fn test_panic_hook_emits_uncaught() {
        let hub = FailureHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = Arc::clone(&seen);
        hub.add_listener(FailureKind::Uncaught, move |event| {
            if let FailureEvent::Uncaught(failure) = event {
                if failure.message == "hook test panic" {
                    assert!(failure.filename.as_deref().unwrap().ends_with("global.rs"));
                    seen_in_listener.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        hub.install_panic_hook();
        hub.install_panic_hook();

        let result = std::panic::catch_unwind(|| panic!("hook test panic"));
        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_monitoring_logs_features() {
        let registry = registry();
        let handler = GlobalHandler::new(Arc::clone(&registry), FailureHub::new());
        let _monitors = handler.initialize_with_monitoring(None);
        assert!(handler.is_initialized());
        let infos = registry.entries(Some(Level::Info));
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].message(), "Enhanced error monitoring initialized");
    }
}
