pub mod entry;
pub mod sink;
pub mod noop_sink;
pub mod console;
pub mod storage;
pub mod env;
pub mod config;
pub mod registry;
pub mod hooks;
pub mod external;
pub mod backend;

#[cfg(feature = "http")]
pub mod sentry;

pub mod global;
pub mod monitor;
pub mod layer;
pub mod init;

pub use config::{ExternalConfig, RegistryConfig, RuntimeEnv};
pub use entry::{Annotations, ErrorInfo, Level, LogEntry, LogRequest};
pub use global::{FailureHub, GlobalHandler};
pub use hooks::ComponentLogger;
pub use registry::{Dispatch, ErrorRegistry, ErrorStats};
pub use sink::LogSink;
