use crate::entry::LogEntry;
use async_trait::async_trait;
use std::error::Error;
use std::future::Future;

/// Error type returned by sinks and crash reporters.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Asynchronous destination for [`LogEntry`]s accepted by the registry.
///
/// Implementations turn an entry into an external effect (a remote crash
/// reporter, a webhook, a local file). The registry calls `send` from its
/// dispatch worker, one entry at a time in call order, and never awaits it
/// on the caller's task.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a single entry.
    ///
    /// **Parameters**
    /// - `entry`: fully-populated [`LogEntry`] built by the registry.
    ///
    /// **Returns**
    /// - `Ok(())` if the entry was accepted.
    /// - `Err(..)` if delivery failed. The registry reports the failure
    ///   on the console failure channel and moves on; it does not retry.
    async fn send(&self, entry: &LogEntry) -> Result<(), BoxError>;

    /// Flush any buffered entries, if the sink implements buffering.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Short name used when reporting failures of this sink.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

tokio::task_local! {
    static SINK_DELIVERY: ();
}

/// Run `future` marked as a sink delivery. Panics raised while it is polled
/// are left to the registry's pipeline failure reporting.
pub(crate) async fn as_sink_delivery<F: Future>(future: F) -> F::Output {
    SINK_DELIVERY.scope((), future).await
}

/// Whether the current code runs inside [`as_sink_delivery`].
pub(crate) fn in_sink_delivery() -> bool {
    SINK_DELIVERY.try_with(|_| ()).is_ok()
}
