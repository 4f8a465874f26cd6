use crate::entry::{Annotations, ErrorInfo};
use crate::env::{self, env_opt};
use crate::storage::DEFAULT_PERSISTED_ENTRIES;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a request is recorded at all.
///
/// Receives the attached error (if any) and the request's context.
pub type ErrorFilter = Arc<dyn Fn(Option<&ErrorInfo>, &Annotations) -> bool + Send + Sync>;

/// Which kind of deployment the registry runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeEnv {
    #[default]
    Development,
    Production,
    Test,
}

impl RuntimeEnv {
    /// Read [`env::ERROR_REGISTRY_ENV`], then [`env::APP_ENV`].
    /// Unset means development.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env_opt(env::ERROR_REGISTRY_ENV).or_else(|| env_opt(env::APP_ENV)) {
            Some(value) => value.parse(),
            None => Ok(RuntimeEnv::Development),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeEnv::Development => "development",
            RuntimeEnv::Production => "production",
            RuntimeEnv::Test => "test",
        }
    }
}

impl FromStr for RuntimeEnv {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeEnv::Development),
            "production" | "prod" => Ok(RuntimeEnv::Production),
            "test" => Ok(RuntimeEnv::Test),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Error returned when configuration values can't be interpreted.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown runtime environment `{0}`")]
    UnknownEnvironment(String),

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Configuration of an [`ErrorRegistry`](crate::registry::ErrorRegistry).
///
/// **Fields**
/// - `max_entries`: capacity of the in-memory ring buffer; the oldest
///   entries are evicted first.
/// - `enable_console_logging`: write every entry to the console.
/// - `enable_external_logging`: forward entries to external sinks.
/// - `persisted_max_entries`: capacity of the persisted mirror.
/// - `maintenance_interval`: period of the background buffer trim.
/// - `dispatch_buffer`: entries queued for sinks before new ones skip them.
/// - `user_agent` / `url`: ambient info stamped on each entry.
/// - `filter`: optional predicate; rejected requests produce no entry.
#[derive(Clone)]
pub struct RegistryConfig {
    pub max_entries: usize,
    pub enable_console_logging: bool,
    pub enable_external_logging: bool,
    pub persisted_max_entries: usize,
    pub maintenance_interval: Duration,
    pub dispatch_buffer: usize,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub filter: Option<ErrorFilter>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::for_env(RuntimeEnv::Development)
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("max_entries", &self.max_entries)
            .field("enable_console_logging", &self.enable_console_logging)
            .field("enable_external_logging", &self.enable_external_logging)
            .field("persisted_max_entries", &self.persisted_max_entries)
            .field("maintenance_interval", &self.maintenance_interval)
            .field("dispatch_buffer", &self.dispatch_buffer)
            .field("user_agent", &self.user_agent)
            .field("url", &self.url)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RegistryConfig {
    /// Defaults for a runtime environment: console output in development,
    /// external sinks in production.
    pub fn for_env(runtime: RuntimeEnv) -> Self {
        Self {
            max_entries: 1000,
            enable_console_logging: runtime == RuntimeEnv::Development,
            enable_external_logging: runtime == RuntimeEnv::Production,
            persisted_max_entries: DEFAULT_PERSISTED_ENTRIES,
            maintenance_interval: Duration::from_secs(5 * 60),
            dispatch_buffer: 1024,
            user_agent: Some(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )),
            url: None,
            filter: None,
        }
    }

    /// Build a config from the process environment, on top of the
    /// defaults for the detected [`RuntimeEnv`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::for_env(RuntimeEnv::from_env()?);

        if let Some(raw) = env_opt(env::ERROR_REGISTRY_MAX_ENTRIES_ENV) {
            config.max_entries = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: env::ERROR_REGISTRY_MAX_ENTRIES_ENV,
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = env_opt(env::ERROR_REGISTRY_CONSOLE_ENV) {
            config.enable_console_logging = parse_flag(env::ERROR_REGISTRY_CONSOLE_ENV, &raw)?;
        }
        if let Some(raw) = env_opt(env::ERROR_REGISTRY_EXTERNAL_ENV) {
            config.enable_external_logging = parse_flag(env::ERROR_REGISTRY_EXTERNAL_ENV, &raw)?;
        }

        Ok(config)
    }

    /// Directory for a [`FileStore`](crate::storage::FileStore), if configured.
    pub fn storage_dir_from_env() -> Option<PathBuf> {
        env_opt(env::ERROR_REGISTRY_STORAGE_DIR_ENV).map(PathBuf::from)
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_console_logging(mut self, enabled: bool) -> Self {
        self.enable_console_logging = enabled;
        self
    }

    pub fn with_external_logging(mut self, enabled: bool) -> Self {
        self.enable_external_logging = enabled;
        self
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(Option<&ErrorInfo>, &Annotations) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

/// External sink identifiers. Presence of a value activates the sink.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalConfig {
    pub runtime: RuntimeEnv,
    pub sentry_dsn: Option<String>,
    pub logrocket_app_id: Option<String>,
}

impl ExternalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            runtime: RuntimeEnv::from_env()?,
            sentry_dsn: env_opt(env::ERROR_REGISTRY_SENTRY_DSN_ENV),
            logrocket_app_id: env_opt(env::ERROR_REGISTRY_LOGROCKET_APP_ID_ENV),
        })
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_defaults() {
        let config = RegistryConfig::for_env(RuntimeEnv::Development);
        assert_eq!(config.max_entries, 1000);
        assert!(config.enable_console_logging);
        assert!(!config.enable_external_logging);
        assert_eq!(config.persisted_max_entries, 100);
        assert_eq!(config.maintenance_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_production_defaults() {
        let config = RegistryConfig::for_env(RuntimeEnv::Production);
        assert!(!config.enable_console_logging);
        assert!(config.enable_external_logging);
    }

    #[test]
    fn test_runtime_env_parse() {
        assert_eq!("Production".parse::<RuntimeEnv>(), Ok(RuntimeEnv::Production));
        assert_eq!("dev".parse::<RuntimeEnv>(), Ok(RuntimeEnv::Development));
        assert_eq!(
            "staging".parse::<RuntimeEnv>(),
            Err(ConfigError::UnknownEnvironment("staging".to_string()))
        );
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("K", "on"), Ok(true));
        assert_eq!(parse_flag("K", "0"), Ok(false));
        assert!(parse_flag("K", "maybe").is_err());
    }

    #[test]
    fn test_filter_builder() {
        let config = RegistryConfig::default()
            .with_filter(|_, context| context.component.as_deref() != Some("Noisy"));
        let filter = config.filter.unwrap();
        assert!(!filter(None, &Annotations::new().with_component("Noisy")));
        assert!(filter(None, &Annotations::new()));
    }
}
