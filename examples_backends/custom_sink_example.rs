use std::sync::Arc;

use async_trait::async_trait;
use error_registry::{
    backend::{build_external_sinks, Capabilities},
    sink::{BoxError, LogSink},
    Annotations, ErrorRegistry, ExternalConfig, FailureHub, GlobalHandler, LogEntry,
    RegistryConfig,
};

/// Example of shipping entries to an in-house collector by implementing
/// the `LogSink` trait directly.
struct CollectorSink;

#[async_trait]
impl LogSink for CollectorSink {
    async fn send(&self, entry: &LogEntry) -> Result<(), BoxError> {
        // Here you would call your own client library for the collector.
        println!("[collector] {}", serde_json::to_string(entry)?);
        Ok(())
    }

    fn name(&self) -> &str {
        "collector"
    }
}

#[tokio::main]
async fn main() {
    let external = ExternalConfig::from_env().expect("invalid environment");
    let sinks = build_external_sinks(
        &external,
        Capabilities {
            custom: vec![Arc::new(CollectorSink)],
            ..Default::default()
        },
    )
    .expect("failed to build external sinks");

    let config = RegistryConfig::default().with_external_logging(true);
    let (registry, _worker) = ErrorRegistry::builder(config).sinks(sinks).build();

    let hub = FailureHub::new();
    hub.install_panic_hook();
    GlobalHandler::new(registry.clone(), hub.clone()).initialize();

    let checkout = registry.for_component("Checkout");
    checkout.track_interaction("submit", None);
    checkout
        .log_warning("payment provider slow", Some(Annotations::new().with_correlation_id("req-42")))
        .wait()
        .await;

    let _ = std::panic::catch_unwind(|| panic!("simulated crash in a worker thread"));

    let stats = registry.error_stats();
    println!("{} entries, {} recent errors", stats.total, stats.recent_errors);
    registry.log_info("custom sink example finished", None, None).wait().await;
}
