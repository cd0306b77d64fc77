//! Bounded worker pool over a shared queue of discovered items.
//!
//! Workers pull one item at a time and send `(display_name, outcome)` pairs
//! over a channel; the calling thread is the only owner of the result map.
//! Items never claimed because of cancellation are recorded as cancelled
//! once the pool drains, so every input item gets exactly one outcome.

use crate::error::Error;
use crate::model::{BackupOutcome, DiscoveredItem};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Shared cooperative cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Exactly one outcome per scheduled item, keyed by display name.
    pub outcomes: BTreeMap<String, BackupOutcome>,
    pub cancelled: bool,
    pub discovery_errors: Vec<Error>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Strict runs fail on any failed item, failed verification or failed
    /// root; every run fails when it was cancelled.
    pub fn overall_success(&self, strict: bool) -> bool {
        if self.cancelled {
            return false;
        }
        if !strict {
            return true;
        }
        self.discovery_errors.is_empty() && self.outcomes.values().all(BackupOutcome::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BackupOutcome> {
        self.outcomes.values().filter(|o| !o.is_ok())
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.succeeded).count()
    }

    pub fn bytes_written(&self) -> u64 {
        self.outcomes.values().map(|o| o.bytes_written).sum()
    }
}

/// Run `job` over `items` on `min(workers, items.len())` threads.
///
/// The cancel token is checked before a worker claims an item (the worker
/// exits) and right after claiming it (the item is recorded as cancelled).
/// A job that panics is recorded as a failed outcome.
pub fn run_all<F>(
    items: Vec<DiscoveredItem>,
    workers: usize,
    cancel: &CancelToken,
    job: F,
) -> RunReport
where
    F: Fn(&DiscoveredItem, &CancelToken) -> BackupOutcome + Sync,
{
    let started = Instant::now();
    let worker_count = workers.max(1).min(items.len());
    let queue = Mutex::new(items.into_iter().collect::<VecDeque<_>>());
    let (tx, rx) = mpsc::channel::<(String, BackupOutcome)>();

    if worker_count > 0 {
        debug!("Starting {} backup workers", worker_count);
        match rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("hotcopy-worker-{}", i))
            .build()
        {
            Ok(pool) => pool.scope(|scope| {
                for _ in 0..worker_count {
                    let tx = tx.clone();
                    let (queue, job) = (&queue, &job);
                    scope.spawn(move |_| worker_loop(queue, cancel, tx, job));
                }
            }),
            Err(e) => {
                warn!("Cannot build worker pool, running inline: {}", e);
                worker_loop(&queue, cancel, tx.clone(), &job);
            }
        }
    }
    drop(tx);

    let mut outcomes = BTreeMap::new();
    for (name, outcome) in rx {
        if outcomes.insert(name.clone(), outcome).is_some() {
            error!("Duplicate outcome for {}", name);
        }
    }

    let leftovers = queue.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    if !leftovers.is_empty() {
        warn!("{} items were not started before cancellation", leftovers.len());
    }
    for item in leftovers {
        outcomes.insert(item.display_name.clone(), BackupOutcome::cancelled(item));
    }

    let cancelled = cancel.is_cancelled() || outcomes.values().any(BackupOutcome::is_cancelled);
    RunReport {
        outcomes,
        cancelled,
        discovery_errors: Vec::new(),
        elapsed: started.elapsed(),
    }
}

fn worker_loop<F>(
    queue: &Mutex<VecDeque<DiscoveredItem>>,
    cancel: &CancelToken,
    tx: Sender<(String, BackupOutcome)>,
    job: &F,
) where
    F: Fn(&DiscoveredItem, &CancelToken) -> BackupOutcome + Sync,
{
    loop {
        if cancel.is_cancelled() {
            debug!("Worker stopping, run was cancelled");
            return;
        }

        let next = queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        let Some(item) = next else {
            return;
        };

        let outcome = run_claimed(&item, cancel, job);
        if tx.send((item.display_name.clone(), outcome)).is_err() {
            return;
        }
    }
}

/// Run `job` on an item a worker has already claimed, unless the run was
/// cancelled in between.
fn run_claimed<F>(item: &DiscoveredItem, cancel: &CancelToken, job: &F) -> BackupOutcome
where
    F: Fn(&DiscoveredItem, &CancelToken) -> BackupOutcome + Sync,
{
    if cancel.is_cancelled() {
        return BackupOutcome::cancelled(item.clone());
    }
    panic::catch_unwind(AssertUnwindSafe(|| job(item, cancel))).unwrap_or_else(|_| {
        error!("Backup of {} panicked", item.display_name);
        BackupOutcome::failure(
            item.clone(),
            Error::Other("backup worker panicked".to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoreKind;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    fn items(n: usize) -> Vec<DiscoveredItem> {
        (0..n)
            .map(|i| DiscoveredItem {
                path: PathBuf::from(format!("/data/{}.log", i)),
                kind: StoreKind::LogFile,
                display_name: format!("{}.log", i),
                source_root: PathBuf::from("/data"),
                size_bytes: 10,
            })
            .collect()
    }

    fn ok_job(item: &DiscoveredItem, _: &CancelToken) -> BackupOutcome {
        BackupOutcome::success(
            item.clone(),
            crate::model::BackupMethod::LogCopy,
            PathBuf::from("/backup").join(&item.display_name),
            item.size_bytes,
        )
    }

    #[test]
    fn test_every_item_gets_one_outcome() {
        for workers in 1..=6 {
            let report = run_all(items(6), workers, &CancelToken::new(), ok_job);
            assert_eq!(report.outcomes.len(), 6, "workers = {}", workers);
            assert!(report.overall_success(true));
            assert_eq!(report.bytes_written(), 60);
        }
    }

    #[test]
    fn test_empty_input() {
        let report = run_all(Vec::new(), 4, &CancelToken::new(), ok_job);
        assert!(report.outcomes.is_empty());
        assert!(report.overall_success(true));
    }

    #[test]
    fn test_cancel_before_start_records_all_as_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let report = run_all(items(4), 2, &cancel, |item, token| {
            calls.fetch_add(1, Ordering::SeqCst);
            ok_job(item, token)
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.outcomes.len(), 4);
        assert!(report.outcomes.values().all(BackupOutcome::is_cancelled));
        assert!(report.cancelled);
        assert!(!report.overall_success(false));
    }

    #[test]
    fn test_cancel_mid_run_skips_remaining_items() {
        let cancel = CancelToken::new();
        let report = run_all(items(10), 1, &cancel, |item, token| {
            if item.display_name == "2.log" {
                token.cancel();
            }
            ok_job(item, token)
        });

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.succeeded_count(), 3);
        assert_eq!(
            report.outcomes.values().filter(|o| o.is_cancelled()).count(),
            7
        );
    }

    #[test]
    fn test_panicking_job_becomes_failure() {
        let report = run_all(items(3), 2, &CancelToken::new(), |item, token| {
            if item.display_name == "1.log" {
                panic!("boom");
            }
            ok_job(item, token)
        });

        assert_eq!(report.outcomes.len(), 3);
        assert!(!report.outcomes["1.log"].succeeded);
        assert!(report.overall_success(false));
        assert!(!report.overall_success(true));
    }

    #[test]
    fn test_claimed_item_is_cancelled_without_running() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let job = |item: &DiscoveredItem, token: &CancelToken| {
            calls.fetch_add(1, Ordering::SeqCst);
            ok_job(item, token)
        };

        let outcome = run_claimed(&items(1)[0], &cancel, &job);
        assert!(outcome.is_cancelled());
        assert!(!outcome.succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let outcome = run_claimed(&items(1)[0], &CancelToken::new(), &job);
        assert!(outcome.succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
