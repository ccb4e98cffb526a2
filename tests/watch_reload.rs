//! Live reload driven by real filesystem notifications.

mod common;

use std::time::Duration;
use common::*;
use serde_json::json;
use tempfile::tempdir;

const WATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Give the OS watcher a moment to register before touching the file.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_modifying_script_reloads_without_respawn() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "// v1");
    let (session, device) = create_session(dir.path(), &script);
    session.start().await.unwrap();
    session.watch().await.unwrap();
    settle().await;

    let pid = session.pid().await;
    let session_id = session.session_id().await;
    let first_script = session.script_id().await.unwrap();

    std::fs::write(&script, "// v2").unwrap();

    let reloaded = poll_until(WATCH_TIMEOUT, || {
        device.sources().last().map(|s| s.as_str()) == Some("// v2")
    }).await;
    assert!(reloaded, "no reload after modification: {:?}", device.calls());

    // Let any further notifications from the same write finish reloading
    settle().await;

    assert_ne!(session.script_id().await.unwrap(), first_script);
    assert_eq!(session.pid().await, pid);
    assert_eq!(session.session_id().await, session_id);

    device.send_event(json!({"event": "after reload", "data": {}}));
    session.stop().await.unwrap();
    assert_eq!(read_records(session.log_path()).len(), 1);

    // One reload per notification: every new script retired the previous one
    let calls = device.calls();
    let creates = calls.iter().filter(|c| c.starts_with("create_script")).count();
    let unloads = calls.iter().filter(|c| c.starts_with("unload")).count();
    assert!(creates >= 2);
    assert_eq!(creates, unloads + 1);
    assert_eq!(calls.iter().filter(|c| c.starts_with("spawn")).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_reload_after_stop() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "// v1");
    let (session, device) = create_session(dir.path(), &script);
    session.start().await.unwrap();
    session.watch().await.unwrap();
    settle().await;

    session.stop().await.unwrap();
    let calls_at_stop = device.calls().len();

    std::fs::write(&script, "// v2").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(device.calls().len(), calls_at_stop);
    assert_eq!(device.sources(), vec!["// v1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_with_dead_process_still_joins_watcher() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "// v1");
    let (session, device) = create_session(dir.path(), &script);
    session.start().await.unwrap();
    session.watch().await.unwrap();

    device.kill_externally(FIRST_PID);
    session.stop().await.unwrap();

    // The watcher no longer holds the session
    assert_eq!(std::sync::Arc::strong_count(&session), 1);
}

#[tokio::test]
async fn test_watch_missing_path_fails() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "// v1");
    let (session, _device) = create_session(dir.path(), &script);
    session.start().await.unwrap();

    std::fs::remove_file(&script).unwrap();
    let err = session.watch().await.unwrap_err();
    assert!(matches!(err, hooklog::Error::WatchFailed(_)));

    session.stop().await.unwrap();
}
