use crate::entry::Level;
use crate::external::{CrashReport, CrashReporter};
use crate::sink::BoxError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Parsed Sentry DSN: `scheme://public_key@host[:port][/prefix]/project_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentryDsn {
    pub scheme: String,
    pub public_key: String,
    /// Host with optional port.
    pub host: String,
    /// Path before the project id, without trailing slash. Usually empty.
    pub path_prefix: String,
    pub project_id: String,
}

/// Error type returned when parsing a DSN.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DsnError {
    #[error("unknown or unsupported DSN scheme")]
    UnknownScheme,

    #[error("DSN has no public key")]
    MissingKey,

    #[error("DSN has no host")]
    MissingHost,

    #[error("DSN has no project id")]
    MissingProject,
}

/// Parse a Sentry DSN string.
///
/// Examples:
/// - "https://abc123@o0.ingest.sentry.io/42"
/// - "http://key@localhost:9000/sentry/7"
pub fn parse_sentry_dsn(dsn: &str) -> Result<SentryDsn, DsnError> {
    let (scheme, rest) = dsn.trim().split_once("://").ok_or(DsnError::UnknownScheme)?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(DsnError::UnknownScheme);
    }

    let (credentials, location) = rest.split_once('@').ok_or(DsnError::MissingKey)?;
    // "key:secret" is accepted, only the public part is used.
    let public_key = credentials.split(':').next().unwrap_or("");
    if public_key.is_empty() {
        return Err(DsnError::MissingKey);
    }

    let (host, path) = location.split_once('/').ok_or(DsnError::MissingProject)?;
    if host.is_empty() {
        return Err(DsnError::MissingHost);
    }

    let path = path.trim_end_matches('/');
    let (path_prefix, project_id) = match path.rsplit_once('/') {
        Some((prefix, project)) => (format!("/{}", prefix), project),
        None => (String::new(), path),
    };
    if project_id.is_empty() {
        return Err(DsnError::MissingProject);
    }

    Ok(SentryDsn {
        scheme,
        public_key: public_key.to_string(),
        host: host.to_string(),
        path_prefix,
        project_id: project_id.to_string(),
    })
}

impl SentryDsn {
    /// Store endpoint with query-string authentication.
    pub fn store_url(&self) -> String {
        format!(
            "{}://{}{}/api/{}/store/?sentry_version=7&sentry_key={}&sentry_client={}",
            self.scheme,
            self.host,
            self.path_prefix,
            self.project_id,
            urlencoding::encode(&self.public_key),
            urlencoding::encode(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
        )
    }
}

impl fmt::Display for SentryDsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}{}/{}",
            self.scheme, self.public_key, self.host, self.path_prefix, self.project_id
        )
    }
}

/// [`CrashReporter`] posting events to Sentry's store endpoint over HTTP.
#[derive(Clone)]
pub struct SentryHttpReporter {
    client: Client,
    dsn: SentryDsn,
    environment: Option<String>,
}

impl SentryHttpReporter {
    /// Construct a reporter for the given DSN.
    ///
    /// **Returns**
    /// - A reporter ready to be wrapped in a
    ///   [`CrashReporterSink`](crate::external::CrashReporterSink).
    /// - `Err(DsnError)` if the DSN is malformed.
    pub fn new(dsn: &str) -> Result<Self, DsnError> {
        Ok(Self {
            client: Client::new(),
            dsn: parse_sentry_dsn(dsn)?,
            environment: None,
        })
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn dsn(&self) -> &SentryDsn {
        &self.dsn
    }

    fn map_report(&self, report: &CrashReport) -> SentryEvent {
        SentryEvent {
            event_id: format!("{:032x}", rand::random::<u128>()),
            timestamp: report.timestamp.to_rfc3339(),
            level: sentry_level(report.level),
            platform: "other",
            logger: env!("CARGO_PKG_NAME"),
            environment: self.environment.clone(),
            message: report.exception.message.clone(),
            exception: SentryExceptionList {
                values: vec![SentryException {
                    ty: report.exception.name.clone(),
                    value: report.exception.message.clone(),
                }],
            },
            tags: report.tags.clone(),
            contexts: report.contexts.clone(),
            extra: report.extra.clone(),
        }
    }
}

fn sentry_level(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warning => "warning",
        Level::Info => "info",
        Level::Debug => "debug",
    }
}

#[derive(Serialize)]
struct SentryEvent {
    event_id: String,
    timestamp: String,
    level: &'static str,
    platform: &'static str,
    logger: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    message: String,
    exception: SentryExceptionList,
    tags: BTreeMap<String, String>,
    contexts: BTreeMap<String, Value>,
    extra: BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct SentryExceptionList {
    values: Vec<SentryException>,
}

#[derive(Serialize)]
struct SentryException {
    #[serde(rename = "type")]
    ty: String,
    value: String,
}

#[async_trait]
impl CrashReporter for SentryHttpReporter {
    async fn capture(&self, report: CrashReport) -> Result<(), BoxError> {
        let event = self.map_report(&report);
        let resp = self
            .client
            .post(self.dsn.store_url())
            .json(&event)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("Sentry store request failed with status {}: {}", status, text).into())
        }
    }
}
