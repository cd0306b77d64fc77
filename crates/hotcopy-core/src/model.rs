use crate::error::Error;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Structural kind of a store found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    KvEngine,
    EmbeddedSql,
    LogFile,
    Unknown,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreKind::KvEngine => "kv-engine",
            StoreKind::EmbeddedSql => "embedded-sql",
            StoreKind::LogFile => "log-file",
            StoreKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified path, created once during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    pub path: PathBuf,
    pub kind: StoreKind,
    /// Unique flattened name, used as the backup target name and result key.
    pub display_name: String,
    pub source_root: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub is_locked: bool,
    pub lock_kind: String,
    pub diagnostic: String,
}

impl LockStatus {
    pub fn unlocked() -> Self {
        Self {
            is_locked: false,
            lock_kind: "none".to_string(),
            diagnostic: String::new(),
        }
    }

    pub fn locked(lock_kind: &str, diagnostic: impl Into<String>) -> Self {
        Self {
            is_locked: true,
            lock_kind: lock_kind.to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Unlocked status recorded when the inspection itself could not run.
    pub fn inspection_failed(diagnostic: impl Into<String>) -> Self {
        Self {
            is_locked: false,
            lock_kind: "inspection-failed".to_string(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// One technique in a per-kind fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupMethod {
    Checkpoint,
    BackupEngine,
    FileCopy,
    RecordCopy,
    OnlineExport,
    SchemaCopy,
    LogCopy,
}

impl BackupMethod {
    /// Whether the method produces a consistent copy while another process writes.
    pub fn is_concurrent_safe(self) -> bool {
        match self {
            BackupMethod::Checkpoint
            | BackupMethod::BackupEngine
            | BackupMethod::OnlineExport
            | BackupMethod::SchemaCopy => true,
            BackupMethod::FileCopy | BackupMethod::RecordCopy | BackupMethod::LogCopy => false,
        }
    }

    pub fn kind(self) -> StoreKind {
        match self {
            BackupMethod::Checkpoint
            | BackupMethod::BackupEngine
            | BackupMethod::FileCopy
            | BackupMethod::RecordCopy => StoreKind::KvEngine,
            BackupMethod::OnlineExport | BackupMethod::SchemaCopy => StoreKind::EmbeddedSql,
            BackupMethod::LogCopy => StoreKind::LogFile,
        }
    }
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupMethod::Checkpoint => "checkpoint",
            BackupMethod::BackupEngine => "backup-engine",
            BackupMethod::FileCopy => "file-copy",
            BackupMethod::RecordCopy => "record-copy",
            BackupMethod::OnlineExport => "online-export",
            BackupMethod::SchemaCopy => "schema-copy",
            BackupMethod::LogCopy => "log-copy",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub passed: bool,
    pub reason: Option<String>,
}

impl VerificationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Terminal result for one discovered item.
#[derive(Debug)]
pub struct BackupOutcome {
    pub item: DiscoveredItem,
    pub succeeded: bool,
    pub bytes_written: u64,
    /// Stage that produced the backup, `None` for failures and dry runs.
    pub method: Option<BackupMethod>,
    pub target: Option<PathBuf>,
    pub error: Option<Error>,
    pub verification: Option<VerificationResult>,
}

impl BackupOutcome {
    pub fn success(item: DiscoveredItem, method: BackupMethod, target: PathBuf, bytes: u64) -> Self {
        Self {
            item,
            succeeded: true,
            bytes_written: bytes,
            method: Some(method),
            target: Some(target),
            error: None,
            verification: None,
        }
    }

    pub fn failure(item: DiscoveredItem, error: Error) -> Self {
        Self {
            item,
            succeeded: false,
            bytes_written: 0,
            method: None,
            target: None,
            error: Some(error),
            verification: None,
        }
    }

    /// Dry-run result: nothing was written.
    pub fn planned(item: DiscoveredItem, target: PathBuf) -> Self {
        Self {
            item,
            succeeded: true,
            bytes_written: 0,
            method: None,
            target: Some(target),
            error: None,
            verification: None,
        }
    }

    pub fn cancelled(item: DiscoveredItem) -> Self {
        Self::failure(item, Error::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_cancelled)
    }

    /// False when the backup failed or a requested verification did not pass.
    pub fn is_ok(&self) -> bool {
        self.succeeded && self.verification.as_ref().map_or(true, |v| v.passed)
    }
}
