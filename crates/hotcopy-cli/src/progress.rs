use hotcopy_core::{ProgressReporter, RunReport};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using one indicatif bar for the whole run.
///
/// - Discovery: total item count becomes the bar length
/// - Items: position advances as workers finish, message shows the latest item
/// - Record copies: message shows records copied so far (total unknown)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_discovery_complete(&self, items: usize, total_bytes: u64) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m Discovered {} stores ({})",
            items,
            HumanBytes(total_bytes)
        );

        let pb = ProgressBar::new(items as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Backing up [{bar:30.cyan/dim}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn on_item_start(&self, name: &str) {
        self.with_bar(|pb| pb.set_message(name.to_string()));
    }

    fn on_item_complete(&self, _name: &str, _bytes_written: u64) {
        self.with_bar(|pb| pb.inc(1));
    }

    fn on_record_progress(&self, processed: u64, total: u64) {
        self.with_bar(|pb| {
            if total > 0 {
                pb.set_message(format!("{}/{} records", processed, total));
            } else {
                pb.set_message(format!("{} records copied", processed));
            }
        });
    }

    fn on_run_complete(&self, report: &RunReport) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
        eprintln!(
            "  \x1b[32m✓\x1b[0m Backup complete: {}/{} items, {} in {:.2}s",
            report.succeeded_count(),
            report.outcomes.len(),
            HumanBytes(report.bytes_written()),
            report.elapsed.as_secs_f64()
        );
    }
}
