use std::sync::Arc;

use crate::config::{ExternalConfig, RuntimeEnv};
use crate::console::TracingConsole;
use crate::external::{CrashReporter, CrashReporterSink};
use crate::sink::LogSink;

/// Runtime objects that are present in this process, decided by the
/// application at composition time.
///
/// A sink whose identifier is configured but whose runtime object is
/// missing is skipped rather than treated as an error.
#[derive(Default, Clone)]
pub struct Capabilities {
    /// Overrides the built-in HTTP reporter for Sentry.
    pub sentry: Option<Arc<dyn CrashReporter>>,
    /// The LogRocket client. LogRocket has no built-in transport.
    pub logrocket: Option<Arc<dyn CrashReporter>>,
    /// Additional application-defined sinks, appended last.
    pub custom: Vec<Arc<dyn LogSink>>,
}

/// Error type returned when building external sinks from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendBuildError {
    #[cfg(feature = "http")]
    #[error("invalid Sentry DSN: {0}")]
    InvalidDsn(#[from] crate::sentry::DsnError),

    #[error("a Sentry DSN is configured but the `http` feature is not enabled")]
    HttpFeatureDisabled,
}

/// Build the list of external sinks selected by `config`.
///
/// This is the main entry point for applications that configure their
/// external logging from the environment instead of constructing sinks
/// manually. Order of the result:
/// 1. the detailed console logger, in development;
/// 2. Sentry, when a DSN is present;
/// 3. LogRocket, when an app id is present and a client was supplied;
/// 4. custom sinks.
pub fn build_external_sinks(
    config: &ExternalConfig,
    capabilities: Capabilities,
) -> Result<Vec<Arc<dyn LogSink>>, BackendBuildError> {
    let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();

    if config.runtime == RuntimeEnv::Development {
        sinks.push(Arc::new(TracingConsole::new()));
    }

    if let Some(dsn) = &config.sentry_dsn {
        sinks.push(Arc::new(sentry_sink(dsn, capabilities.sentry)?));
    }

    if let Some(app_id) = &config.logrocket_app_id {
        match capabilities.logrocket {
            Some(reporter) => sinks.push(Arc::new(CrashReporterSink::logrocket(reporter))),
            None => tracing::debug!(app_id = %app_id, "LogRocket app id configured without a client, skipping"),
        }
    }

    sinks.extend(capabilities.custom);
    tracing::debug!(count = sinks.len(), "external sinks configured");
    Ok(sinks)
}

#[cfg(feature = "http")]
fn sentry_sink(
    dsn: &str,
    reporter: Option<Arc<dyn CrashReporter>>,
) -> Result<CrashReporterSink, BackendBuildError> {
    use crate::sentry::{parse_sentry_dsn, SentryHttpReporter};

    let reporter = match reporter {
        Some(reporter) => {
            parse_sentry_dsn(dsn)?;
            reporter
        }
        None => Arc::new(SentryHttpReporter::new(dsn)?) as Arc<dyn CrashReporter>,
    };
    Ok(CrashReporterSink::sentry(reporter))
}

#[cfg(not(feature = "http"))]
fn sentry_sink(
    _dsn: &str,
    reporter: Option<Arc<dyn CrashReporter>>,
) -> Result<CrashReporterSink, BackendBuildError> {
    match reporter {
        Some(reporter) => Ok(CrashReporterSink::sentry(reporter)),
        None => Err(BackendBuildError::HttpFeatureDisabled),
    }
}
