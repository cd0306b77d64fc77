use crate::config::{self, AppConfig};
use crate::error::Error;
use crate::lock;
use crate::model::{BackupOutcome, DiscoveredItem};
use crate::progress::ProgressReporter;
use crate::scanner::{self, Discovery, GlobFilter};
use crate::scheduler::{self, CancelToken, RunReport};
use crate::strategy;
use crate::verify;
use std::fs;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct HotcopyEngine {
    config: AppConfig,
    cancel: CancelToken,
}

impl HotcopyEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token that stops the run at the next item boundary when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn discover(&self) -> Discovery {
        let filter = GlobFilter::new(&self.config.include, &self.config.exclude);
        scanner::discover_all(&self.config.source_paths, &filter)
    }

    /// Run the full pipeline:
    /// 1. Discover and classify stores under every source path
    /// 2. Back up each item on the worker pool (lock check, fallback chain)
    /// 3. Verify each backup when configured
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<RunReport, Error> {
        if !self.config.dry_run {
            if self.config.destination.as_os_str().is_empty() {
                return Err(Error::Other("no destination directory configured".to_string()));
            }
            fs::create_dir_all(&self.config.destination)?;
        }

        info!("Discovering stores...");
        let discovery_start = Instant::now();
        let discovery = self.discover();
        debug!(
            "Discovery completed in {:.2}s: {} items, {} bytes, {} failed roots",
            discovery_start.elapsed().as_secs_f64(),
            discovery.items.len(),
            discovery.total_bytes(),
            discovery.errors.len(),
        );
        reporter.on_discovery_complete(discovery.items.len(), discovery.total_bytes());

        let mut report = self.run_items(discovery.items, reporter);
        report.discovery_errors = discovery.errors;

        let failures = report.failures().count();
        if failures > 0 {
            warn!(
                "{} of {} items failed or did not verify",
                failures,
                report.outcomes.len()
            );
        }
        reporter.on_run_complete(&report);
        Ok(report)
    }

    /// Back up already discovered items. Exactly one outcome per item.
    pub fn run_items(&self, items: Vec<DiscoveredItem>, reporter: &dyn ProgressReporter) -> RunReport {
        let workers = config::effective_workers(self.config.workers);
        info!("Backing up {} items with up to {} workers", items.len(), workers);
        let report = scheduler::run_all(items, workers, &self.cancel, |item, cancel| {
            self.process_item(item, cancel, reporter)
        });

        // Cancelled items never reach the completion callback inside the job.
        for (name, _) in report.outcomes.iter().filter(|(_, o)| o.is_cancelled()) {
            reporter.on_item_complete(name, 0);
        }
        report
    }

    fn process_item(
        &self,
        item: &DiscoveredItem,
        cancel: &CancelToken,
        reporter: &dyn ProgressReporter,
    ) -> BackupOutcome {
        reporter.on_item_start(&item.display_name);

        if cancel.is_cancelled() {
            debug!("{} cancelled before its backup started", item.display_name);
            return BackupOutcome::cancelled(item.clone());
        }

        let lock = lock::check_lock(item);
        if lock.is_locked {
            info!(
                "{} appears to be in use ({}): {}",
                item.display_name, lock.lock_kind, lock.diagnostic
            );
        }
        let plan = strategy::plan(item.kind, &lock, self.config.methods.for_kind(item.kind));
        let target = self.config.destination.join(&item.display_name);

        if self.config.dry_run {
            info!(
                "[dry run] {} ({}) -> {} via {:?}",
                item.path.display(),
                item.kind,
                target.display(),
                plan.stages
            );
            reporter.on_item_complete(&item.display_name, 0);
            return BackupOutcome::planned(item.clone(), target);
        }

        let mut outcome = match strategy::execute(item, &target, &lock, &plan, reporter) {
            Ok((method, bytes)) => BackupOutcome::success(item.clone(), method, target.clone(), bytes),
            Err(e) => {
                error!("Backup of {} failed: {}", item.display_name, e);
                BackupOutcome::failure(item.clone(), e)
            }
        };

        if self.config.verify && outcome.succeeded {
            outcome.verification = Some(verify::verify(item, &target));
        }

        reporter.on_item_complete(&item.display_name, outcome.bytes_written);
        outcome
    }
}
