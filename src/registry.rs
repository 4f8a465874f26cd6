use crate::config::RegistryConfig;
use crate::console::{Console, PipelineStage, TracingConsole};
use crate::entry::{generate_id, Annotations, ErrorInfo, Level, LogEntry, LogRequest};
use crate::hooks::ComponentLogger;
use crate::sink::{as_sink_delivery, LogSink};
use crate::storage::{KeyValueStore, PersistentMirror};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};

type Buffer = Arc<Mutex<VecDeque<LogEntry>>>;

/// Why an entry could not be handed to the dispatch worker.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue is full, entry skipped external sinks")]
    QueueFull,

    #[error("dispatch worker has stopped")]
    WorkerStopped,
}

enum Job {
    Entry {
        entry: LogEntry,
        done: oneshot::Sender<()>,
    },
    ClearMirror {
        done: oneshot::Sender<()>,
    },
}

/// Completion handle returned by [`ErrorRegistry::log`].
///
/// The entry is already in the buffer when this is returned. Awaiting
/// [`Dispatch::wait`] additionally waits for the persisted mirror and the
/// external sinks; dropping the handle leaves that work running.
#[derive(Debug)]
pub struct Dispatch {
    entry_id: Option<String>,
    done: Option<oneshot::Receiver<()>>,
}

impl Dispatch {
    fn skipped() -> Self {
        Dispatch {
            entry_id: None,
            done: None,
        }
    }

    /// Id of the recorded entry, `None` when the filter rejected the request.
    pub fn entry_id(&self) -> Option<&str> {
        self.entry_id.as_deref()
    }

    pub fn was_recorded(&self) -> bool {
        self.entry_id.is_some()
    }

    /// Wait until the worker has finished with this entry's sinks.
    pub async fn wait(self) {
        if let Some(done) = self.done {
            let _ = done.await;
        }
    }
}

/// Aggregate counts over the buffer, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total: usize,
    pub by_level: BTreeMap<Level, usize>,
    /// Error-level entries newer than one hour.
    pub recent_errors: usize,
}

impl ErrorStats {
    pub fn count(&self, level: Level) -> usize {
        self.by_level.get(&level).copied().unwrap_or(0)
    }
}

/// Counters of the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub dropped: u64,
}

/// Bounded in-memory record of everything logged during one session.
///
/// Built once at startup with [`ErrorRegistry::builder`] and shared as an
/// `Arc` with every component that logs. Entries go into a ring buffer
/// synchronously; the persisted mirror and external sinks are fed by a
/// background worker in call order. Nothing here ever returns a logging
/// failure to the caller: pipeline failures go to
/// [`Console::pipeline_failure`].
pub struct ErrorRegistry {
    config: RegistryConfig,
    max_entries: usize,
    session_id: String,
    buffer: Buffer,
    location: RwLock<Option<String>>,
    console: Arc<dyn Console>,
    mirror: Option<PersistentMirror>,
    sender: mpsc::Sender<Job>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Composes an [`ErrorRegistry`] with its console, store and sinks.
pub struct RegistryBuilder {
    config: RegistryConfig,
    console: Arc<dyn Console>,
    store: Option<Arc<dyn KeyValueStore>>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl RegistryBuilder {
    /// Replace the default [`TracingConsole`].
    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Mirror recent entries into `store`.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an external sink. Sinks run in registration order.
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn LogSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    /// Create the registry and spawn its dispatch worker.
    ///
    /// Must be called from within a Tokio runtime. The worker stops, after
    /// flushing every sink, once the last `Arc<ErrorRegistry>` is dropped.
    pub fn build(self) -> (Arc<ErrorRegistry>, JoinHandle<()>) {
        let max_entries = self.config.max_entries.max(1);
        let dispatch_buffer = self.config.dispatch_buffer.max(16);
        let maintenance_interval = self.config.maintenance_interval.max(Duration::from_secs(1));

        let (tx, rx) = mpsc::channel::<Job>(dispatch_buffer);
        let buffer: Buffer = Arc::new(Mutex::new(VecDeque::with_capacity(max_entries.min(1024))));
        let mirror = self
            .store
            .map(|store| PersistentMirror::new(store, self.config.persisted_max_entries));

        let worker = Worker {
            rx,
            buffer: Arc::clone(&buffer),
            max_entries,
            mirror: mirror.clone(),
            sinks: self.sinks,
            external_enabled: self.config.enable_external_logging,
            console: Arc::clone(&self.console),
        };
        let handle = tokio::spawn(worker.run(maintenance_interval));

        let now = Utc::now();
        let registry = ErrorRegistry {
            location: RwLock::new(self.config.url.clone()),
            config: self.config,
            max_entries,
            session_id: generate_id("session", now),
            buffer,
            console: self.console,
            mirror,
            sender: tx,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };

        tracing::debug!(session_id = %registry.session_id, max_entries, "error registry started");
        (Arc::new(registry), handle)
    }
}

impl ErrorRegistry {
    pub fn builder(config: RegistryConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            console: Arc::new(TracingConsole::new()),
            store: None,
            sinks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Update the ambient location stamped on subsequent entries.
    pub fn set_location(&self, url: Option<String>) {
        *self.location.write() = url;
    }

    /// Record one entry.
    ///
    /// Runs the filter, builds the entry, appends it to the buffer (evicting
    /// the oldest entries beyond `max_entries`), writes it to the console if
    /// enabled, and queues it for the mirror and external sinks.
    pub fn log(&self, request: LogRequest) -> Dispatch {
        if let Some(filter) = &self.config.filter {
            if !filter(request.error.as_ref(), &request.context) {
                return Dispatch::skipped();
            }
        }

        let entry = LogEntry::build(
            request,
            Utc::now(),
            &self.session_id,
            self.config.user_agent.clone(),
            self.location.read().clone(),
        );
        let entry_id = entry.id().to_string();
        let console_copy = self.config.enable_console_logging.then(|| entry.clone());
        let (done_tx, done_rx) = oneshot::channel();

        // Append and enqueue under one lock so sinks see buffer order.
        let sent = {
            let mut buffer = self.buffer.lock();
            buffer.push_back(entry.clone());
            trim(&mut buffer, self.max_entries);
            self.sender.try_send(Job::Entry {
                entry,
                done: done_tx,
            })
        };

        if let Some(entry) = &console_copy {
            self.console.emit(entry);
        }

        match sent {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                Dispatch {
                    entry_id: Some(entry_id),
                    done: Some(done_rx),
                }
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    TrySendError::Full(_) => DispatchError::QueueFull,
                    TrySendError::Closed(_) => DispatchError::WorkerStopped,
                };
                self.console.pipeline_failure(PipelineStage::Dispatch, &reason);
                Dispatch {
                    entry_id: Some(entry_id),
                    done: None,
                }
            }
        }
    }

    pub fn log_error<E: Error + ?Sized>(
        &self,
        error: &E,
        context: Option<Annotations>,
        metadata: Option<Annotations>,
    ) -> Dispatch {
        self.log_error_info(ErrorInfo::from_error(error), context, metadata)
    }

    /// Like [`log_error`](Self::log_error) for an already captured error.
    pub fn log_error_info(
        &self,
        error: ErrorInfo,
        context: Option<Annotations>,
        metadata: Option<Annotations>,
    ) -> Dispatch {
        let request = LogRequest::new(Level::Error, error.message.clone())
            .with_error(error)
            .with_context(context.unwrap_or_default())
            .with_metadata(metadata.unwrap_or_default());
        self.log(request)
    }

    pub fn log_warning(
        &self,
        message: impl Into<String>,
        context: Option<Annotations>,
        metadata: Option<Annotations>,
    ) -> Dispatch {
        self.log_message(Level::Warning, message.into(), context, metadata)
    }

    pub fn log_info(
        &self,
        message: impl Into<String>,
        context: Option<Annotations>,
        metadata: Option<Annotations>,
    ) -> Dispatch {
        self.log_message(Level::Info, message.into(), context, metadata)
    }

    pub fn log_debug(
        &self,
        message: impl Into<String>,
        context: Option<Annotations>,
        metadata: Option<Annotations>,
    ) -> Dispatch {
        self.log_message(Level::Debug, message.into(), context, metadata)
    }

    fn log_message(
        &self,
        level: Level,
        message: String,
        context: Option<Annotations>,
        metadata: Option<Annotations>,
    ) -> Dispatch {
        let request = LogRequest::new(level, message)
            .with_context(context.unwrap_or_default())
            .with_metadata(metadata.unwrap_or_default());
        self.log(request)
    }

    /// Façade that tags every entry with `component`.
    pub fn for_component(self: &Arc<Self>, component: impl Into<String>) -> ComponentLogger {
        ComponentLogger::new(Arc::clone(self), component)
    }

    /// Snapshot of the buffer, optionally restricted to one level.
    pub fn entries(&self, level: Option<Level>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        match level {
            Some(level) => buffer.iter().filter(|e| e.level() == level).cloned().collect(),
            None => buffer.iter().cloned().collect(),
        }
    }

    /// The last `count` entries, oldest first.
    pub fn recent_entries(&self, count: usize) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        let skip = buffer.len().saturating_sub(count);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Entries tagged with `component` in their context or metadata.
    pub fn entries_by_component(&self, component: &str) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| {
                e.context().component.as_deref() == Some(component)
                    || e.metadata().component.as_deref() == Some(component)
            })
            .cloned()
            .collect()
    }

    pub fn error_stats(&self) -> ErrorStats {
        let one_hour_ago = Utc::now() - ChronoDuration::hours(1);
        let buffer = self.buffer.lock();

        let mut by_level = BTreeMap::new();
        let mut recent_errors = 0;
        for entry in buffer.iter() {
            *by_level.entry(entry.level()).or_insert(0) += 1;
            if entry.level() == Level::Error && entry.timestamp() > one_hour_ago {
                recent_errors += 1;
            }
        }

        ErrorStats {
            total: buffer.len(),
            by_level,
            recent_errors,
        }
    }

    /// Empty the buffer and remove the persisted mirror.
    ///
    /// The mirror is cleared after every entry queued before this call has
    /// been written, so it can't be repopulated by earlier entries.
    pub async fn clear(&self) {
        self.buffer.lock().clear();

        let Some(mirror) = &self.mirror else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .sender
            .send(Job::ClearMirror { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        } else if let Err(e) = mirror.clear().await {
            self.console.pipeline_failure(PipelineStage::Persistence, &e);
        }
    }

    /// Copy of every buffered entry, oldest first.
    pub fn export(&self) -> Vec<LogEntry> {
        self.entries(None)
    }

    /// Append previously exported entries, then re-apply the size cap.
    ///
    /// Imported entries keep their ids and sessions and are not sent to
    /// any sink.
    pub fn import(&self, entries: impl IntoIterator<Item = LogEntry>) {
        let mut buffer = self.buffer.lock();
        buffer.extend(entries);
        trim(&mut buffer, self.max_entries);
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn trim(buffer: &mut VecDeque<LogEntry>, max_entries: usize) {
    while buffer.len() > max_entries {
        buffer.pop_front();
    }
}

struct Worker {
    rx: mpsc::Receiver<Job>,
    buffer: Buffer,
    max_entries: usize,
    mirror: Option<PersistentMirror>,
    sinks: Vec<Arc<dyn LogSink>>,
    external_enabled: bool,
    console: Arc<dyn Console>,
}

impl Worker {
    async fn run(mut self, maintenance_interval: Duration) {
        let mut maintenance = interval_at(Instant::now() + maintenance_interval, maintenance_interval);

        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => self.handle(job).await,
                    None => break,
                },
                _ = maintenance.tick() => {
                    trim(&mut self.buffer.lock(), self.max_entries);
                }
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.flush().await {
                self.console
                    .pipeline_failure(PipelineStage::ExternalSink(sink.name()), &*e);
            }
        }
        tracing::debug!("error registry dispatch worker stopped");
    }

    async fn handle(&self, job: Job) {
        match job {
            Job::Entry { entry, done } => {
                if let Some(mirror) = &self.mirror {
                    if let Err(e) = mirror.append(&entry).await {
                        self.console.pipeline_failure(PipelineStage::Persistence, &e);
                    }
                }
                if self.external_enabled {
                    for sink in &self.sinks {
                        self.deliver(sink, &entry).await;
                    }
                }
                let _ = done.send(());
            }
            Job::ClearMirror { done } => {
                if let Some(mirror) = &self.mirror {
                    if let Err(e) = mirror.clear().await {
                        self.console.pipeline_failure(PipelineStage::Persistence, &e);
                    }
                }
                let _ = done.send(());
            }
        }
    }

    /// Run one sink on its own task so a panicking sink can't take the
    /// worker down with it.
    async fn deliver(&self, sink: &Arc<dyn LogSink>, entry: &LogEntry) {
        let task_sink = Arc::clone(sink);
        let task_entry = entry.clone();
        let outcome = tokio::spawn(as_sink_delivery(async move {
            task_sink.send(&task_entry).await
        }))
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self
                .console
                .pipeline_failure(PipelineStage::ExternalSink(sink.name()), &*e),
            Err(join_error) => self
                .console
                .pipeline_failure(PipelineStage::ExternalSink(sink.name()), &join_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop_sink::NoopSink;

    fn quiet_config() -> RegistryConfig {
        RegistryConfig::default()
            .with_console_logging(false)
            .with_external_logging(true)
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let (registry, _worker) = ErrorRegistry::builder(quiet_config().with_max_entries(3)).build();
        for m in ["a", "b", "c", "d"] {
            registry.log_info(m, None, None);
        }
        let messages: Vec<String> = registry
            .recent_entries(10)
            .iter()
            .map(|e| e.message().to_string())
            .collect();
        assert_eq!(messages, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_recent_entries_zero_is_empty() {
        let (registry, _worker) = ErrorRegistry::builder(quiet_config()).build();
        registry.log_info("a", None, None);
        assert!(registry.recent_entries(0).is_empty());
        assert_eq!(registry.recent_entries(1).len(), 1);
    }

    #[tokio::test]
    async fn test_entries_share_session() {
        let (registry, _worker) = ErrorRegistry::builder(quiet_config()).build();
        registry.log_info("a", None, None);
        registry.log_debug("b", None, None);
        let entries = registry.entries(None);
        assert!(registry.session_id().starts_with("session_"));
        assert!(entries.iter().all(|e| e.session_id() == registry.session_id()));
        assert_ne!(entries[0].id(), entries[1].id());
    }

    #[tokio::test]
    async fn test_filter_rejects_without_entry() {
        let config = quiet_config().with_filter(|error, _| {
            error.map(|e| !e.message.contains("ignore")).unwrap_or(true)
        });
        let (registry, _worker) = ErrorRegistry::builder(config).build();

        let dispatch = registry.log_error_info(ErrorInfo::from_message("please ignore"), None, None);
        assert!(!dispatch.was_recorded());
        dispatch.wait().await;

        registry.log_error_info(ErrorInfo::from_message("keep"), None, None);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_location_is_stamped() {
        let (registry, _worker) = ErrorRegistry::builder(quiet_config()).build();
        registry.set_location(Some("https://example.test/tools".to_string()));
        registry.log_info("page", None, None).wait().await;
        assert_eq!(
            registry.entries(None)[0].url(),
            Some("https://example.test/tools")
        );
    }

    #[tokio::test]
    async fn test_dispatch_counts_enqueued() {
        let (registry, _worker) = ErrorRegistry::builder(quiet_config())
            .sink(Arc::new(NoopSink))
            .build();
        registry.log_info("a", None, None).wait().await;
        registry.log_info("b", None, None).wait().await;
        assert_eq!(
            registry.dispatch_stats(),
            DispatchStats {
                enqueued: 2,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_worker_stops_when_registry_dropped() {
        let (registry, worker) = ErrorRegistry::builder(quiet_config()).build();
        registry.log_info("last words", None, None);
        drop(registry);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}
