use crate::layer::RegistryLayer;
use crate::registry::ErrorRegistry;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the process-wide `tracing` subscriber.
///
/// **Fields**
/// - `min_level`: least severe `tracing` level recorded in the
///   [`ErrorRegistry`].
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   installed next to the [`RegistryLayer`]. This is also where the
///   registry's own console output ends up.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub min_level: tracing::Level,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            min_level: tracing::Level::WARN,
            enable_stdout: true,
        }
    }
}

/// Install a global subscriber that records `tracing` events in
/// `registry`.
///
/// **Errors**
///
/// Fails if a global default subscriber was already set.
pub fn init_tracing_with_config(
    registry: Arc<ErrorRegistry>,
    config: LayerConfig,
) -> Result<(), SetGlobalDefaultError> {
    let layer = RegistryLayer::new(registry).with_min_level(config.min_level);
    let fmt_layer = config
        .enable_stdout
        .then(|| tracing_subscriber::fmt::layer());

    let subscriber = Registry::default().with(layer).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
}

/// [`init_tracing_with_config`] with [`LayerConfig::default`].
pub fn init_tracing(registry: Arc<ErrorRegistry>) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(registry, LayerConfig::default())
}
