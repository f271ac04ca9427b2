//! Tests for `src/logging.rs`.

use courier::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; the directory is created first
    // either way.
    let _result = courier::logging::init_production(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_production_fails_when_logs_dir_is_a_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let blocker = tmp.path().join("logs");
    std::fs::write(&blocker, "not a directory").expect("write blocker file");

    let result = courier::logging::init_production(&blocker.join("nested"), "info");
    assert!(result.is_err());
}
