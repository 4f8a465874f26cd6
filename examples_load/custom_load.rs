use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use error_registry::init::{init_tracing_with_config, LayerConfig};
use error_registry::noop_sink::NoopSink;
use error_registry::{ErrorRegistry, RegistryConfig};

#[tokio::main]
async fn main() {
    let mut config = RegistryConfig::default()
        .with_max_entries(10_000)
        .with_console_logging(false)
        .with_external_logging(true);
    config.dispatch_buffer = 50_000;

    let (registry, _worker) = ErrorRegistry::builder(config)
        .sink(Arc::new(NoopSink))
        .build();

    let layer_config = LayerConfig {
        min_level: tracing::Level::ERROR,
        enable_stdout: false,
    };
    init_tracing_with_config(registry.clone(), layer_config).expect("set global subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: recorded {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Wait for the sinks to drain behind the last entry.
    registry.log_info("load test finished", None, None).wait().await;
    let stats = registry.dispatch_stats();
    println!("dispatch: {} enqueued, {} dropped", stats.enqueued, stats.dropped);
}
