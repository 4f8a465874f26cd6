use std::sync::Arc;

use error_registry::{
    backend::{build_external_sinks, Capabilities},
    config::RuntimeEnv,
    storage::{FileStore, KeyValueStore, MemoryStore},
    ErrorRegistry, ExternalConfig, RegistryConfig,
};

#[tokio::main]
async fn main() {
    // Example DSN: https://<public_key>@o0.ingest.sentry.io/<project_id>
    let dsn = std::env::var("ERROR_REGISTRY_SENTRY_DSN")
        .unwrap_or_else(|_| "http://public@127.0.0.1:9000/1".to_string());

    let external = ExternalConfig {
        runtime: RuntimeEnv::Production,
        sentry_dsn: Some(dsn),
        logrocket_app_id: None,
    };
    let sinks = build_external_sinks(&external, Capabilities::default())
        .expect("invalid Sentry DSN");

    let store: Arc<dyn KeyValueStore> = match RegistryConfig::storage_dir_from_env() {
        Some(dir) => Arc::new(FileStore::new(dir)),
        None => Arc::new(MemoryStore::new()),
    };

    let config = RegistryConfig::for_env(RuntimeEnv::Production).with_console_logging(true);
    let (registry, _worker) = ErrorRegistry::builder(config)
        .store(store)
        .sinks(sinks)
        .build();

    let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "inventory service down");
    registry.log_error(&err, None, None).wait().await;
}
