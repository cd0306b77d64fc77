use chrono::Local;
use clap::{Args, Parser, Subcommand};
use hotcopy_core::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hotcopy")]
#[command(about = "Hot backups of key-value stores, SQLite databases and log files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Back up every store found under the source paths
    Backup(BackupArgs),
    /// List discovered stores with their kind, size and lock status
    Discover(SourceArgs),
    /// Compare an existing backup with its source
    Verify {
        /// Store the backup was taken from
        source: PathBuf,
        /// Backup produced from it
        backup: PathBuf,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Source paths; replaces the configured list when given
    pub sources: Vec<PathBuf>,

    /// Only back up files matching this glob (repeatable)
    #[arg(long)]
    pub include: Vec<String>,

    /// Skip files matching this glob (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,
}

impl SourceArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if !self.sources.is_empty() {
            config.source_paths = self.sources.clone();
        }
        if !self.include.is_empty() {
            config.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            config.exclude = self.exclude.clone();
        }
    }
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory receiving the backups
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// Worker threads, 0 for one per CPU
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Verify every backup against its source
    #[arg(long)]
    pub verify: bool,

    /// Exit non-zero if any item fails
    #[arg(long)]
    pub strict: bool,

    /// Plan the backup without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Write directly into the destination instead of a timestamped subdirectory
    #[arg(long)]
    pub no_timestamp: bool,

    /// Cancel items not yet started after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

impl BackupArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        self.source.apply(config);
        if let Some(dest) = &self.dest {
            config.destination = dest.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.verify |= self.verify;
        config.strict |= self.strict;
        config.dry_run |= self.dry_run;

        if !self.no_timestamp && !config.destination.as_os_str().is_empty() {
            let stamp = Local::now().format("hotcopy-%Y%m%d-%H%M%S").to_string();
            config.destination = config.destination.join(stamp);
        }
    }
}
