use crate::scheduler::RunReport;

/// Trait for reporting backup progress.
///
/// Called concurrently from worker threads. The CLI implements it with indicatif.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_discovery_complete(&self, _items: usize, _total_bytes: u64) {}
    fn on_item_start(&self, _name: &str) {}
    fn on_item_complete(&self, _name: &str, _bytes_written: u64) {}
    /// `total` is 0 when the record count is not known up front.
    fn on_record_progress(&self, _processed: u64, _total: u64) {}
    fn on_run_complete(&self, _report: &RunReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
