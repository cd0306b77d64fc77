use crate::error::Error;
use crate::model::VerificationResult;
use crate::strategy::{files, kv};
use rocksdb::{ColumnFamily, IteratorMode, DB};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Record-level comparison of a KV backup with its source.
///
/// Backup-engine output is restored into a scratch directory beside the
/// backup first, and the scratch copy is removed afterwards.
pub fn verify_kv(source: &Path, backup: &Path) -> Result<VerificationResult, Error> {
    if !kv::is_backup_engine_dir(backup) {
        return compare_stores(source, backup);
    }

    let scratch = scratch_path(backup);
    files::remove_path(&scratch)?;
    debug!("Restoring {} into {} for verification", backup.display(), scratch.display());
    kv::restore_latest(backup, &scratch)?;

    let result = compare_stores(source, &scratch);
    if let Err(e) = files::remove_path(&scratch) {
        warn!("Cannot remove {}: {}", scratch.display(), e);
    }
    result
}

fn scratch_path(backup: &Path) -> PathBuf {
    let mut name = OsString::from(backup.as_os_str());
    name.push(".verify");
    PathBuf::from(name)
}

fn compare_stores(source: &Path, backup: &Path) -> Result<VerificationResult, Error> {
    let source_db = kv::open_read_only(source)?;
    let backup_db = match kv::open_read_only(backup) {
        Ok(db) => db,
        Err(e) => return Ok(VerificationResult::fail(format!("cannot open backup: {}", e))),
    };

    for name in kv::column_families(source) {
        let Some(source_cf) = source_db.cf_handle(&name) else {
            continue;
        };
        let Some(backup_cf) = backup_db.cf_handle(&name) else {
            return Ok(VerificationResult::fail(format!(
                "column family '{}' is missing from the backup",
                name
            )));
        };

        let source_count = count_records(&source_db, source_cf)?;
        let backup_count = count_records(&backup_db, backup_cf)?;
        if source_count != backup_count {
            return Ok(VerificationResult::fail(format!(
                "record count mismatch in '{}': source {}, backup {}",
                name, source_count, backup_count
            )));
        }

        for entry in source_db.iterator_cf(source_cf, IteratorMode::Start) {
            let (key, value) = entry?;
            match backup_db.get_cf(backup_cf, &key)? {
                None => {
                    return Ok(VerificationResult::fail(format!(
                        "key {} missing from backup",
                        display_key(&key)
                    )))
                }
                Some(found) if found.as_slice() != &*value => {
                    return Ok(VerificationResult::fail(format!(
                        "value mismatch for key {}",
                        display_key(&key)
                    )))
                }
                Some(_) => {}
            }
        }
        debug!("Column family '{}' matches ({} records)", name, source_count);
    }

    Ok(VerificationResult::pass())
}

fn count_records(db: &DB, cf: &ColumnFamily) -> Result<u64, Error> {
    let mut count = 0;
    for entry in db.iterator_cf(cf, IteratorMode::Start) {
        entry?;
        count += 1;
    }
    Ok(count)
}

/// UTF-8 keys verbatim, anything else as lowercase hex.
pub fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) => format!("'{}'", s),
        Err(_) => key.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_key() {
        assert_eq!(display_key(b"user:42"), "'user:42'");
        assert_eq!(display_key(&[0xff, 0x00, 0x10]), "ff0010");
    }

    #[test]
    fn test_scratch_path() {
        assert_eq!(
            scratch_path(Path::new("/backups/store")),
            PathBuf::from("/backups/store.verify")
        );
    }
}
