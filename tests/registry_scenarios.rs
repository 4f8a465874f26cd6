mod common;

use common::{FailingSink, PanickingSink, RecordingConsole, RecordingSink};
use error_registry::storage::{FileStore, KeyValueStore, MemoryStore, PersistentMirror, STORAGE_KEY};
use error_registry::{Annotations, ErrorRegistry, Level, LogEntry, RegistryConfig};
use serde_json::json;
use std::io;
use std::sync::Arc;

fn config() -> RegistryConfig {
    RegistryConfig::default()
        .with_console_logging(true)
        .with_external_logging(true)
}

fn messages(entries: &[LogEntry]) -> Vec<String> {
    entries.iter().map(|e| e.message().to_string()).collect()
}

#[tokio::test]
async fn test_oldest_entries_are_evicted() {
    let (registry, _worker) = ErrorRegistry::builder(config().with_max_entries(3))
        .console(RecordingConsole::new())
        .build();

    for message in ["a", "b", "c", "d"] {
        registry.log_info(message, None, None);
    }

    assert_eq!(messages(&registry.recent_entries(10)), vec!["b", "c", "d"]);
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn test_error_is_found_by_component() {
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();

    let boom = io::Error::new(io::ErrorKind::Other, "boom");
    registry.log_error(&boom, Some(Annotations::new().with_component("LoginForm")), None);
    registry.log_info("unrelated", None, None);

    let found = registry.entries_by_component("LoginForm");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].message(), "boom");
    assert_eq!(found[0].level(), Level::Error);
}

#[tokio::test]
async fn test_storage_quota_does_not_fail_logging() {
    let console = RecordingConsole::new();
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(console.clone())
        .store(Arc::new(MemoryStore::with_quota(16)))
        .build();

    registry.log_warning("disk full test", None, None).wait().await;

    let warnings = registry.entries(Some(Level::Warning));
    assert_eq!(messages(&warnings), vec!["disk full test"]);
    assert_eq!(console.messages(), vec!["disk full test"]);
    assert_eq!(console.failure_stages(), vec!["persistent storage"]);
}

#[tokio::test]
async fn test_level_filter_preserves_order() {
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();

    registry.log_error(&io::Error::new(io::ErrorKind::Other, "first"), None, None);
    registry.log_warning("noise", None, None);
    registry.log_error(&io::Error::new(io::ErrorKind::Other, "second"), None, None);

    assert_eq!(
        messages(&registry.entries(Some(Level::Error))),
        vec!["first", "second"]
    );
}

#[tokio::test]
async fn test_clear_empties_buffer_and_mirror() {
    let store = Arc::new(MemoryStore::new());
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .store(store.clone())
        .build();

    registry.log_info("one", None, None);
    registry.log_info("two", None, None).wait().await;
    assert!(store.get(STORAGE_KEY).await.unwrap().is_some());

    registry.clear().await;

    assert!(registry.entries(None).is_empty());
    assert!(registry.recent_entries(5).is_empty());
    assert!(store.get(STORAGE_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_mirror_keeps_latest_entries_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));
    let mut config = config();
    config.persisted_max_entries = 2;
    let (registry, _worker) = ErrorRegistry::builder(config)
        .console(RecordingConsole::new())
        .store(store.clone())
        .build();

    registry.log_info("a", None, None);
    registry.log_info("b", None, None);
    registry.log_info("c", None, None).wait().await;

    let persisted = PersistentMirror::new(store, 2).load().await.unwrap();
    assert_eq!(messages(&persisted), vec!["b", "c"]);
    assert!(dir.path().join("error-registry.json").exists());
}

#[tokio::test]
async fn test_stats_exclude_errors_older_than_an_hour() {
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();

    let stale: LogEntry = serde_json::from_value(json!({
        "id": "error_1_abcdefghi",
        "timestamp": "2001-01-01T00:00:00Z",
        "level": "error",
        "message": "ancient",
        "error": { "name": "Error", "message": "ancient" },
        "sessionId": "session_1_abcdefghi"
    }))
    .unwrap();
    registry.import(vec![stale]);

    registry.log_error(&io::Error::new(io::ErrorKind::Other, "fresh"), None, None);
    registry.log_info("note", None, None);

    let stats = registry.error_stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count(Level::Error), 2);
    assert_eq!(stats.count(Level::Info), 1);
    assert_eq!(stats.count(Level::Debug), 0);
    assert_eq!(stats.recent_errors, 1);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let (source, _w1) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();
    source.log_info("a", Some(Annotations::new().with("k", 1)), None);
    source.log_warning("b", None, Some(Annotations::new().with_correlation_id("c-1")));
    source.log_error(&io::Error::new(io::ErrorKind::Other, "c"), None, None);

    let exported = source.export();
    let wire = serde_json::to_string(&exported).unwrap();

    let sink = RecordingSink::new();
    let (target, _w2) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .sink(sink.clone())
        .build();
    target.import(serde_json::from_str::<Vec<LogEntry>>(&wire).unwrap());

    assert_eq!(target.entries(None), exported);
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_import_respects_size_cap() {
    let (source, _w1) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();
    for message in ["a", "b", "c", "d"] {
        source.log_info(message, None, None);
    }

    let (target, _w2) = ErrorRegistry::builder(config().with_max_entries(2))
        .console(RecordingConsole::new())
        .build();
    target.import(source.export());

    assert_eq!(messages(&target.entries(None)), vec!["c", "d"]);
}

#[tokio::test]
async fn test_broken_sinks_do_not_reach_the_caller() {
    let console = RecordingConsole::new();
    let healthy = RecordingSink::new();
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(console.clone())
        .sink(Arc::new(PanickingSink))
        .sink(Arc::new(FailingSink))
        .sink(healthy.clone())
        .build();

    registry
        .log_error(&io::Error::new(io::ErrorKind::Other, "original"), None, None)
        .wait()
        .await;
    registry.log_info("after", None, None).wait().await;

    assert_eq!(console.messages(), vec!["original", "after"]);
    assert_eq!(healthy.messages(), vec!["original", "after"]);
    assert_eq!(
        console.failure_stages(),
        vec![
            "external sink `panicking`",
            "external sink `failing`",
            "external sink `panicking`",
            "external sink `failing`",
        ]
    );
}

#[tokio::test]
async fn test_sinks_see_call_order() {
    let sink = RecordingSink::new();
    let (registry, _worker) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .sink(sink.clone())
        .build();

    let mut last = None;
    for i in 0..50 {
        last = Some(registry.log_debug(format!("m{}", i), None, None));
    }
    if let Some(dispatch) = last {
        dispatch.wait().await;
    }

    let expected: Vec<String> = (0..50).map(|i| format!("m{}", i)).collect();
    assert_eq!(sink.messages(), expected);
}

#[tokio::test]
async fn test_external_logging_disabled_skips_sinks() {
    let sink = RecordingSink::new();
    let (registry, _worker) = ErrorRegistry::builder(config().with_external_logging(false))
        .console(RecordingConsole::new())
        .sink(sink.clone())
        .build();

    registry.log_warning("local only", None, None).wait().await;

    assert_eq!(registry.len(), 1);
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_component_key_survives_round_trip() {
    let (source, _w1) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();
    source.log_warning("slow render", Some(Annotations::new().with("component", "Nav")), None);
    assert_eq!(source.entries_by_component("Nav").len(), 1);

    let wire = serde_json::to_string(&source.export()).unwrap();
    let (target, _w2) = ErrorRegistry::builder(config())
        .console(RecordingConsole::new())
        .build();
    target.import(serde_json::from_str::<Vec<LogEntry>>(&wire).unwrap());

    assert_eq!(target.entries_by_component("Nav").len(), 1);
    assert_eq!(target.entries(None), source.entries(None));
}
