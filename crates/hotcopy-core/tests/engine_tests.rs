use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use hotcopy_core::model::{BackupMethod, StoreKind};
use hotcopy_core::progress::{ProgressReporter, SilentReporter};
use hotcopy_core::{AppConfig, CancelToken, HotcopyEngine, RunReport};
use rocksdb::{Options, DB};
use rusqlite::Connection;

fn config(sources: &[&Path], dest: &Path, workers: usize) -> AppConfig {
    AppConfig {
        source_paths: sources.iter().map(|p| p.to_path_buf()).collect(),
        destination: dest.to_path_buf(),
        workers,
        ..Default::default()
    }
}

fn write_logs(dir: &Path, count: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        fs::write(dir.join(format!("app-{}.log", i)), format!("entry {}\n", i)).unwrap();
    }
}

fn create_mixed_tree(root: &Path) {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    let db = DB::open(&opts, root.join("kv")).unwrap();
    for i in 0..100 {
        db.put(format!("k{}", i), format!("v{}", i)).unwrap();
    }
    drop(db);

    fs::create_dir_all(root.join("sql")).unwrap();
    let conn = Connection::open(root.join("sql/app.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO events (body) VALUES ('a'), ('b'), ('c');",
    )
    .unwrap();
    drop(conn);

    write_logs(&root.join("logs"), 2);
}

#[derive(Default)]
struct CountingReporter {
    started: AtomicUsize,
    completed: AtomicUsize,
    discovered: AtomicUsize,
    runs: AtomicUsize,
}

impl ProgressReporter for CountingReporter {
    fn on_discovery_complete(&self, items: usize, _total_bytes: u64) {
        self.discovered.store(items, Ordering::SeqCst);
    }

    fn on_item_start(&self, _name: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_item_complete(&self, _name: &str, _bytes_written: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run_complete(&self, _report: &RunReport) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_one_failing_item_out_of_five() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    write_logs(src.path(), 5);

    let engine = HotcopyEngine::new(config(&[src.path()], dest.path(), 3));
    let discovery = engine.discover();
    assert_eq!(discovery.items.len(), 5);

    // Vanishes between discovery and backup.
    fs::remove_file(src.path().join("app-2.log")).unwrap();

    let report = engine.run_items(discovery.items, &SilentReporter);
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.succeeded_count(), 4);

    let failed = &report.outcomes["app-2.log"];
    assert!(!failed.succeeded);
    assert!(failed.error.is_some());
    assert!(!failed.is_cancelled());

    assert!(report.overall_success(false));
    assert!(!report.overall_success(true));
    assert!(dest.path().join("app-0.log").exists());
    assert!(!dest.path().join("app-2.log").exists());
}

#[test]
fn test_every_item_gets_one_outcome_for_any_worker_count() {
    let src = tempdir().unwrap();
    write_logs(src.path(), 7);

    for workers in 1..=9 {
        let dest = tempdir().unwrap();
        let engine = HotcopyEngine::new(config(&[src.path()], dest.path(), workers));
        let report = engine.run(&SilentReporter).unwrap();
        assert_eq!(report.outcomes.len(), 7, "workers = {}", workers);
        assert_eq!(report.succeeded_count(), 7, "workers = {}", workers);
    }
}

#[test]
fn test_mixed_tree_with_verification() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    create_mixed_tree(src.path());

    let mut cfg = config(&[src.path()], dest.path(), 4);
    cfg.verify = true;
    cfg.strict = true;
    let engine = HotcopyEngine::new(cfg);
    let reporter = CountingReporter::default();
    let report = engine.run(&reporter).unwrap();

    assert_eq!(report.outcomes.len(), 4);
    for (name, outcome) in &report.outcomes {
        assert!(outcome.is_ok(), "{}: {:?}", name, outcome.error);
        assert!(outcome.verification.as_ref().is_some_and(|v| v.passed), "{}", name);
    }
    assert_eq!(report.outcomes["kv"].item.kind, StoreKind::KvEngine);
    assert_eq!(report.outcomes["kv"].method, Some(BackupMethod::Checkpoint));
    assert_eq!(report.outcomes["sql_app.db"].method, Some(BackupMethod::OnlineExport));
    assert_eq!(report.outcomes["logs_app-0.log"].method, Some(BackupMethod::LogCopy));
    assert!(report.overall_success(true));

    assert_eq!(reporter.discovered.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.started.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.completed.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_configured_preference_is_used() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    create_mixed_tree(src.path());

    let mut cfg = config(&[src.path()], dest.path(), 2);
    cfg.methods.embedded_sql = Some(BackupMethod::SchemaCopy);
    cfg.verify = true;
    let report = HotcopyEngine::new(cfg).run(&SilentReporter).unwrap();

    let sql = &report.outcomes["sql_app.db"];
    assert_eq!(sql.method, Some(BackupMethod::SchemaCopy));
    assert!(sql.is_ok());
}

#[test]
fn test_dry_run_writes_nothing() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    create_mixed_tree(src.path());
    let out = dest.path().join("never-created");

    let mut cfg = config(&[src.path()], &out, 2);
    cfg.dry_run = true;
    let report = HotcopyEngine::new(cfg).run(&SilentReporter).unwrap();

    assert_eq!(report.outcomes.len(), 4);
    for outcome in report.outcomes.values() {
        assert!(outcome.succeeded);
        assert_eq!(outcome.bytes_written, 0);
        assert!(outcome.method.is_none());
    }
    assert!(!out.exists());
}

#[test]
fn test_cancel_before_run_marks_everything_cancelled() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    write_logs(src.path(), 4);

    let engine = HotcopyEngine::new(config(&[src.path()], dest.path(), 2));
    engine.cancel_token().cancel();
    let report = engine.run(&SilentReporter).unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.cancelled);
    assert!(report.outcomes.values().all(|o| o.is_cancelled()));
    assert!(!report.overall_success(false));
    assert!(!dest.path().join("app-0.log").exists());
}

/// Cancels the run as soon as the first item starts.
struct CancelOnStart {
    token: CancelToken,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl ProgressReporter for CancelOnStart {
    fn on_item_start(&self, _name: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }

    fn on_item_complete(&self, _name: &str, _bytes_written: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_cancel_after_claim_skips_the_started_item() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    write_logs(src.path(), 3);

    let engine = HotcopyEngine::new(config(&[src.path()], dest.path(), 1));
    let reporter = CancelOnStart {
        token: engine.cancel_token(),
        started: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
    };
    let report = engine.run(&reporter).unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert!(report.cancelled);
    let first = &report.outcomes["app-0.log"];
    assert!(first.is_cancelled());
    assert_eq!(first.bytes_written, 0);
    assert!(report.outcomes.values().all(|o| o.is_cancelled()));
    assert!(!dest.path().join("app-0.log").exists());

    // Only the claimed item started, yet every item is reported complete.
    assert_eq!(reporter.started.load(Ordering::SeqCst), 1);
    assert_eq!(reporter.completed.load(Ordering::SeqCst), 3);
}

#[test]
fn test_failed_root_only_fails_strict_runs() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    write_logs(src.path(), 2);
    let missing = src.path().parent().unwrap().join("hotcopy-missing-root");

    let engine = HotcopyEngine::new(config(&[src.path(), &missing], dest.path(), 2));
    let report = engine.run(&SilentReporter).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.discovery_errors.len(), 1);
    assert!(report.overall_success(false));
    assert!(!report.overall_success(true));
}

#[test]
fn test_missing_destination_is_an_error() {
    let src = tempdir().unwrap();
    write_logs(src.path(), 1);
    let cfg = AppConfig {
        source_paths: vec![src.path().to_path_buf()],
        ..Default::default()
    };
    assert!(HotcopyEngine::new(cfg).run(&SilentReporter).is_err());
}

#[test]
fn test_empty_source_produces_empty_report() {
    let src = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let report = HotcopyEngine::new(config(&[src.path()], dest.path(), 4))
        .run(&SilentReporter)
        .unwrap();
    assert!(report.outcomes.is_empty());
    assert!(report.overall_success(true));
}
