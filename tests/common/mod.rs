#![allow(dead_code)]

use async_trait::async_trait;
use error_registry::console::{Console, PipelineStage};
use error_registry::sink::{BoxError, LogSink};
use error_registry::LogEntry;
use parking_lot::Mutex;
use std::error::Error;
use std::sync::Arc;

/// Console that keeps everything it is given.
#[derive(Default)]
pub struct RecordingConsole {
    pub emitted: Mutex<Vec<LogEntry>>,
    pub failures: Mutex<Vec<(String, String)>>,
}

impl RecordingConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.emitted
            .lock()
            .iter()
            .map(|e| e.message().to_string())
            .collect()
    }

    pub fn failure_stages(&self) -> Vec<String> {
        self.failures.lock().iter().map(|(s, _)| s.clone()).collect()
    }
}

impl Console for RecordingConsole {
    fn emit(&self, entry: &LogEntry) {
        self.emitted.lock().push(entry.clone());
    }

    fn pipeline_failure(&self, stage: PipelineStage<'_>, error: &(dyn Error + 'static)) {
        self.failures
            .lock()
            .push((stage.to_string(), error.to_string()));
    }
}

/// Sink that keeps every entry it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<LogEntry>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|e| e.message().to_string())
            .collect()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn send(&self, entry: &LogEntry) -> Result<(), BoxError> {
        self.received.lock().push(entry.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Sink that fails every delivery.
pub struct FailingSink;

#[async_trait]
impl LogSink for FailingSink {
    async fn send(&self, _entry: &LogEntry) -> Result<(), BoxError> {
        Err("collector unreachable".into())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Sink that panics on every delivery.
pub struct PanickingSink;

#[async_trait]
impl LogSink for PanickingSink {
    async fn send(&self, entry: &LogEntry) -> Result<(), BoxError> {
        panic!("sink blew up on {}", entry.id());
    }

    fn name(&self) -> &str {
        "panicking"
    }
}
