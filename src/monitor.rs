//! Advisory performance, memory and network monitors.
//!
//! Each monitor only records warnings in the registry when a threshold is
//! crossed. None of them change the behavior of the work being observed.

use crate::entry::{Annotations, ErrorInfo};
use crate::registry::ErrorRegistry;
use crate::sink::BoxError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Thresholds used by [`Monitors`] and [`NetworkMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorThresholds {
    pub long_task: Duration,
    pub largest_paint: Duration,
    /// Percentage of total memory in use above which a warning is logged.
    pub memory_percent: f64,
    pub memory_interval: Duration,
    pub slow_request: Duration,
    pub request_timeout: Duration,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        MonitorThresholds {
            long_task: Duration::from_millis(50),
            largest_paint: Duration::from_millis(2500),
            memory_percent: 80.0,
            memory_interval: Duration::from_secs(30),
            slow_request: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A memory reading in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used: u64,
    pub limit: u64,
}

impl MemoryUsage {
    pub fn used_percent(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.used as f64 / self.limit as f64 * 100.0
    }
}

/// Source of memory readings.
pub trait MemoryProbe: Send + Sync {
    /// `None` when the platform offers no reading.
    fn sample(&self) -> Option<MemoryUsage>;
}

/// System-wide memory from `/proc/meminfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMeminfoProbe;

impl MemoryProbe for ProcMeminfoProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        let text = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&text)
    }
}

/// Parse `MemTotal` and `MemAvailable` (in kB) out of meminfo text.
pub fn parse_meminfo(text: &str) -> Option<MemoryUsage> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match key {
            Some("MemTotal:") => total = value,
            Some("MemAvailable:") => available = value,
            _ => {}
        }
    }
    let total = total? * 1024;
    let available = available? * 1024;
    Some(MemoryUsage {
        used: total.saturating_sub(available),
        limit: total,
    })
}

/// Long-task, paint and memory monitors bound to one registry.
///
/// A memory sampler started with [`start_memory_sampler`](Self::start_memory_sampler)
/// is stopped when this value is dropped.
pub struct Monitors {
    registry: Arc<ErrorRegistry>,
    thresholds: MonitorThresholds,
    sampler: Option<JoinHandle<()>>,
}

impl Monitors {
    pub fn new(registry: Arc<ErrorRegistry>, thresholds: MonitorThresholds) -> Self {
        Monitors {
            registry,
            thresholds,
            sampler: None,
        }
    }

    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.thresholds
    }

    /// Record a finished unit of work. Returns `true` if it was flagged.
    pub fn record_task(&self, name: &str, duration: Duration) -> bool {
        if duration <= self.thresholds.long_task {
            return false;
        }
        self.registry.log_warning(
            "Long task detected",
            Some(Annotations::new().with("source", "performance-monitoring")),
            Some(
                Annotations::new()
                    .with("name", name)
                    .with("duration", duration.as_millis() as u64),
            ),
        );
        true
    }

    /// Run `future`, then [`record_task`](Self::record_task) its wall time.
    pub async fn time<F: Future>(&self, name: &str, future: F) -> F::Output {
        let start = Instant::now();
        let output = future.await;
        self.record_task(name, start.elapsed());
        output
    }

    /// Record the time until the largest element was rendered.
    pub fn record_largest_paint(&self, start_time: Duration, element: Option<&str>) -> bool {
        if start_time <= self.thresholds.largest_paint {
            return false;
        }
        let mut metadata = Annotations::new().with("lcp", start_time.as_millis() as u64);
        if let Some(element) = element {
            metadata = metadata.with("element", element);
        }
        self.registry.log_warning(
            "Slow LCP detected",
            Some(Annotations::new().with("source", "performance-monitoring")),
            Some(metadata),
        );
        true
    }

    /// Check one memory reading against the threshold.
    pub fn check_memory(&self, usage: MemoryUsage) -> bool {
        check_memory(&self.registry, self.thresholds.memory_percent, usage)
    }

    /// Sample `probe` every `memory_interval`, replacing any running sampler.
    pub fn start_memory_sampler(&mut self, probe: Arc<dyn MemoryProbe>) {
        if let Some(previous) = self.sampler.take() {
            previous.abort();
        }
        let registry: Weak<ErrorRegistry> = Arc::downgrade(&self.registry);
        let period = self.thresholds.memory_interval;
        let threshold = self.thresholds.memory_percent;

        self.sampler = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                if let Some(usage) = probe.sample() {
                    check_memory(&registry, threshold, usage);
                }
            }
        }));
    }

    /// Wrap `transport` with request monitoring.
    pub fn network<T: FetchTransport>(&self, transport: T) -> NetworkMonitor<T> {
        NetworkMonitor::new(Arc::clone(&self.registry), transport)
            .with_slow_threshold(self.thresholds.slow_request)
            .with_timeout(self.thresholds.request_timeout)
    }
}

impl Drop for Monitors {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
    }
}

fn check_memory(registry: &ErrorRegistry, threshold: f64, usage: MemoryUsage) -> bool {
    let percent = usage.used_percent();
    if percent <= threshold {
        return false;
    }
    registry.log_warning(
        "High memory usage detected",
        Some(Annotations::new().with("source", "memory-monitoring")),
        Some(
            Annotations::new()
                .with("usedBytes", usage.used)
                .with("limitBytes", usage.limit)
                .with("percentage", percent.round()),
        ),
    );
    true
}

/// Performs one request and reports its status.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    type Response: Send;

    async fn fetch(&self, url: &str) -> Result<Self::Response, BoxError>;

    /// Status code and reason phrase of a response.
    fn status(response: &Self::Response) -> (u16, String);
}

#[cfg(feature = "http")]
#[async_trait]
impl FetchTransport for reqwest::Client {
    type Response = reqwest::Response;

    async fn fetch(&self, url: &str) -> Result<reqwest::Response, BoxError> {
        Ok(self.get(url).send().await?)
    }

    fn status(response: &reqwest::Response) -> (u16, String) {
        let status = response.status();
        (
            status.as_u16(),
            status.canonical_reason().unwrap_or("").to_string(),
        )
    }
}

/// Error type returned by [`NetworkMonitor::fetch`].
#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("request to {url} timed out after {timeout:?}")]
    TimedOut { url: String, timeout: Duration },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: BoxError },
}

/// Observes requests made through a [`FetchTransport`].
///
/// Responses are returned unchanged, including non-2xx ones. Nothing is
/// retried.
pub struct NetworkMonitor<T> {
    registry: Arc<ErrorRegistry>,
    transport: T,
    slow_threshold: Duration,
    timeout: Duration,
}

impl<T: FetchTransport> NetworkMonitor<T> {
    pub fn new(registry: Arc<ErrorRegistry>, transport: T) -> Self {
        let defaults = MonitorThresholds::default();
        NetworkMonitor {
            registry,
            transport,
            slow_threshold: defaults.slow_request,
            timeout: defaults.request_timeout,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch(&self, url: &str) -> Result<T::Response, MonitorError> {
        let start = Instant::now();
        let result = time::timeout(self.timeout, self.transport.fetch(url)).await;
        let duration = start.elapsed();
        let context = || Annotations::new().with("source", "network-monitoring");

        match result {
            Err(_) => {
                self.registry.log_warning(
                    "Network request timed out",
                    Some(context()),
                    Some(
                        Annotations::new()
                            .with("url", url)
                            .with("timeout", self.timeout.as_millis() as u64),
                    ),
                );
                Err(MonitorError::TimedOut {
                    url: url.to_string(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(source)) => {
                self.registry.log_error_info(
                    ErrorInfo {
                        name: "FetchError".to_string(),
                        message: source.to_string(),
                        stack: None,
                    },
                    Some(context()),
                    Some(
                        Annotations::new()
                            .with("url", url)
                            .with("duration", duration.as_millis() as u64),
                    ),
                );
                Err(MonitorError::Transport {
                    url: url.to_string(),
                    reason: source,
                })
            }
            Ok(Ok(response)) => {
                let (status, status_text) = T::status(&response);
                if !(200..300).contains(&status) {
                    self.registry.log_warning(
                        "HTTP request failed",
                        Some(context()),
                        Some(
                            Annotations::new()
                                .with("url", url)
                                .with("status", status)
                                .with("statusText", status_text)
                                .with("duration", duration.as_millis() as u64),
                        ),
                    );
                } else if duration > self.slow_threshold {
                    self.registry.log_warning(
                        "Slow network request",
                        Some(context()),
                        Some(
                            Annotations::new()
                                .with("url", url)
                                .with("duration", duration.as_millis() as u64),
                        ),
                    );
                }
                Ok(response)
            }
        }
    }
}
