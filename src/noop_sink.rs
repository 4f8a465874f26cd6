use crate::entry::LogEntry;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;

/// A sink that simply drops all entries.
///
/// Useful for measuring the overhead of the registry itself without any
/// external I/O, and as a placeholder when no external sink is configured.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _entry: &LogEntry) -> Result<(), BoxError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
