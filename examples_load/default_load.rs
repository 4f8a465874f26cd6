use std::time::Instant;
use tracing::error;

use error_registry::init::init_tracing;
use error_registry::{ErrorRegistry, RegistryConfig};

#[tokio::main]
async fn main() {
    let config = RegistryConfig::default().with_console_logging(false);
    let (registry, _worker) = ErrorRegistry::builder(config).build();
    init_tracing(registry.clone()).expect("set global subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: recorded {} events in {:?} (~{:.0} ev/s), buffer holds {}",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        registry.len(),
    );

    let stats = registry.dispatch_stats();
    println!("dispatch: {} enqueued, {} dropped", stats.enqueued, stats.dropped);
}
