//! Environment variable names used by this crate for configuring the
//! registry and its external sinks at startup.
//!
//! These are purely helpers; the registry and sink types remain decoupled
//! from environment access.

/// Runtime environment: `development`, `production` or `test`.
pub const ERROR_REGISTRY_ENV: &str = "ERROR_REGISTRY_ENV";

/// Fallback for [`ERROR_REGISTRY_ENV`] shared with the host application.
pub const APP_ENV: &str = "APP_ENV";

/// Capacity of the in-memory ring buffer.
pub const ERROR_REGISTRY_MAX_ENTRIES_ENV: &str = "ERROR_REGISTRY_MAX_ENTRIES";

/// Force console logging on or off (`true`/`false`/`1`/`0`).
pub const ERROR_REGISTRY_CONSOLE_ENV: &str = "ERROR_REGISTRY_CONSOLE";

/// Force external logging on or off (`true`/`false`/`1`/`0`).
pub const ERROR_REGISTRY_EXTERNAL_ENV: &str = "ERROR_REGISTRY_EXTERNAL";

/// Directory for the persisted mirror when using a file store.
pub const ERROR_REGISTRY_STORAGE_DIR_ENV: &str = "ERROR_REGISTRY_STORAGE_DIR";

/// Sentry DSN. Its presence activates the Sentry sink.
pub const ERROR_REGISTRY_SENTRY_DSN_ENV: &str = "ERROR_REGISTRY_SENTRY_DSN";

/// LogRocket application id. Its presence activates the LogRocket sink
/// when a reporter capability is supplied.
pub const ERROR_REGISTRY_LOGROCKET_APP_ID_ENV: &str = "ERROR_REGISTRY_LOGROCKET_APP_ID";

/// Read a non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
