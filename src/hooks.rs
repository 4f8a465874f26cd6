use crate::entry::{generate_id, Annotations, ErrorInfo, Level, LogRequest};
use crate::registry::{Dispatch, ErrorRegistry};
use chrono::Utc;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

/// Pre-tagged façade onto an [`ErrorRegistry`].
///
/// Every entry logged through it carries `component = <name>` in its
/// context, overriding any component the caller passed.
#[derive(Clone)]
pub struct ComponentLogger {
    registry: Arc<ErrorRegistry>,
    component: String,
    retry_base_delay: Duration,
}

impl ComponentLogger {
    pub fn new(registry: Arc<ErrorRegistry>, component: impl Into<String>) -> Self {
        ComponentLogger {
            registry,
            component: component.into(),
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Log `Component mounted` now and the matching unmount entries when
    /// the returned guard is dropped.
    pub fn track_lifecycle(&self) -> LifecycleGuard {
        self.log_info("Component mounted", Some(timestamped()));
        LifecycleGuard {
            logger: self.clone(),
            mounted_at: Instant::now(),
        }
    }

    /// Record how long a component stayed mounted: a warning over
    /// [`SLOW_UNMOUNT`], an info entry otherwise.
    pub fn record_lifecycle(&self, duration: Duration) -> Dispatch {
        let context = Annotations::new().with("duration", duration.as_millis() as u64);
        if duration > SLOW_UNMOUNT {
            self.log_warning("Component unmount took too long", Some(context))
        } else {
            self.log_info("Component lifecycle completed", Some(context))
        }
    }

    /// Base delay of [`run_with_retries`](Self::run_with_retries) backoff.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn registry(&self) -> &Arc<ErrorRegistry> {
        &self.registry
    }

    fn tag(&self, context: Option<Annotations>) -> Option<Annotations> {
        Some(context.unwrap_or_default().with_component(self.component.clone()))
    }

    pub fn log_error<E: Error + ?Sized>(&self, error: &E, context: Option<Annotations>) -> Dispatch {
        self.registry.log_error(error, self.tag(context), None)
    }

    pub fn log_warning(&self, message: impl Into<String>, context: Option<Annotations>) -> Dispatch {
        self.registry.log_warning(message, self.tag(context), None)
    }

    pub fn log_info(&self, message: impl Into<String>, context: Option<Annotations>) -> Dispatch {
        self.registry.log_info(message, self.tag(context), None)
    }

    /// Record a user action as an info entry.
    pub fn track_interaction(&self, action: &str, details: Option<Annotations>) -> Dispatch {
        let context = details.unwrap_or_default().with_action(action);
        self.log_info(format!("User interaction: {}", action), Some(context))
    }

    /// Error-boundary capture: log `error` under a fresh error id and
    /// return the id so the caller can show it to the user.
    pub fn capture_error<E: Error + ?Sized>(&self, error: &E, context: Option<Annotations>) -> String {
        let error_id = generate_id("error", Utc::now());
        let context = context.unwrap_or_default().with("errorId", error_id.clone());
        self.log_error(error, Some(context));
        error_id
    }

    /// Run `op` up to `retries + 1` times, sleeping `2^attempt` × base
    /// delay between attempts.
    ///
    /// Success is logged at info level. When every attempt fails the last
    /// error is logged with the operation name and attempt count, and
    /// returned to the caller.
    pub async fn run_with_retries<T, E, F, Fut>(
        &self,
        operation: &str,
        retries: u32,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.log_info(
                        "Async operation completed successfully",
                        Some(
                            Annotations::new()
                                .with_action(operation)
                                .with("attempts", attempts + 1),
                        ),
                    );
                    return Ok(value);
                }
                Err(error) => {
                    attempts += 1;
                    if attempts > retries {
                        self.log_error(
                            &error,
                            Some(
                                Annotations::new()
                                    .with("operation", operation)
                                    .with("attempts", attempts),
                            ),
                        );
                        return Err(error);
                    }
                    sleep(self.retry_base_delay * 2u32.saturating_pow(attempts)).await;
                }
            }
        }
    }
}

/// Lifetime above which an unmount is reported as slow.
pub const SLOW_UNMOUNT: Duration = Duration::from_secs(1);

fn timestamped() -> Annotations {
    Annotations::new().with("timestamp", Utc::now().to_rfc3339())
}

/// Returned by [`ComponentLogger::track_lifecycle`].
pub struct LifecycleGuard {
    logger: ComponentLogger,
    mounted_at: Instant,
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.logger.log_info("Component unmounted", Some(timestamped()));
        self.logger.record_lifecycle(self.mounted_at.elapsed());
    }
}

/// Log an error captured elsewhere (for example by a UI boundary) with its
/// component stack.
pub fn log_boundary_error(
    registry: &ErrorRegistry,
    component: &str,
    error: ErrorInfo,
    component_stack: impl Into<String>,
) -> Dispatch {
    let request = LogRequest::new(Level::Error, error.message.clone())
        .with_error(error)
        .with_component_stack(component_stack)
        .with_context(Annotations::new().with_component(component));
    registry.log(request)
}
