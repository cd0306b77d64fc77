use crate::model::{DiscoveredItem, LockStatus, StoreKind};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const KV_LOCK_FILE: &str = "LOCK";
pub const SQL_COMPANION_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Decide whether another process may be writing to the item.
///
/// Never fails: when inspection itself cannot run the item is reported
/// unlocked and a warning is logged, so the backup still proceeds.
pub fn check_lock(item: &DiscoveredItem) -> LockStatus {
    let status = match item.kind {
        StoreKind::KvEngine => check_kv_lock(&item.path),
        StoreKind::EmbeddedSql => check_sql_lock(&item.path),
        StoreKind::LogFile | StoreKind::Unknown => LockStatus::unlocked(),
    };
    debug!(
        "Lock status for {}: locked={} ({})",
        item.display_name, status.is_locked, status.lock_kind
    );
    status
}

pub fn check_kv_lock(dir: &Path) -> LockStatus {
    let lock_file = dir.join(KV_LOCK_FILE);
    match lock_file.try_exists() {
        Ok(true) => LockStatus::locked(
            "lock-file",
            format!("{} is present", lock_file.display()),
        ),
        Ok(false) => LockStatus::unlocked(),
        Err(e) => {
            warn!("Cannot inspect {}: {}", lock_file.display(), e);
            LockStatus::inspection_failed(e.to_string())
        }
    }
}

/// `<db>-wal`, `<db>-shm` and `<db>-journal` next to the database file.
pub fn companion_paths(db_path: &Path) -> Vec<PathBuf> {
    SQL_COMPANION_SUFFIXES
        .iter()
        .map(|suffix| {
            let mut name = OsString::from(db_path.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

pub fn check_sql_lock(db_path: &Path) -> LockStatus {
    // Companion files are checked first; the probe below opens the file
    // read-write and may create them itself.
    for companion in companion_paths(db_path) {
        match companion.try_exists() {
            Ok(true) => {
                return LockStatus::locked(
                    "companion-files",
                    format!("{} exists, database may be in use", companion.display()),
                )
            }
            Ok(false) => {}
            Err(e) => warn!("Cannot inspect {}: {}", companion.display(), e),
        }
    }

    match probe_exclusive(db_path) {
        Ok(()) => LockStatus::unlocked(),
        Err(rusqlite::Error::SqliteFailure(err, msg))
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            LockStatus::locked(
                "busy",
                msg.unwrap_or_else(|| "database is locked by another connection".to_string()),
            )
        }
        Err(e) => {
            warn!(
                "Lock probe failed for {}, assuming unlocked: {}",
                db_path.display(),
                e
            );
            LockStatus::inspection_failed(e.to_string())
        }
    }
}

fn probe_exclusive(db_path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::ZERO)?;
    conn.execute_batch("BEGIN EXCLUSIVE; ROLLBACK;")
}
