use super::{files, refuse_if_locked, StageContext};
use crate::error::Error;
use crate::model::BackupMethod;
use rocksdb::backup::{BackupEngine, BackupEngineOptions, RestoreOptions};
use rocksdb::checkpoint::Checkpoint;
use rocksdb::{Env, IteratorMode, Options, WriteBatch, DB};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

pub const RECORD_BATCH_SIZE: usize = 1000;
pub const RECORD_PROGRESS_INTERVAL: u64 = 10_000;

/// An opened source store; read-only when another process holds it.
pub struct SourceDb {
    pub db: DB,
    pub read_only: bool,
}

/// Column families of the store at `path`, `default` when they cannot be listed.
pub fn column_families(path: &Path) -> Vec<String> {
    match DB::list_cf(&Options::default(), path) {
        Ok(cfs) if !cfs.is_empty() => cfs,
        Ok(_) => vec![rocksdb::DEFAULT_COLUMN_FAMILY_NAME.to_string()],
        Err(e) => {
            debug!("Cannot list column families of {}: {}", path.display(), e);
            vec![rocksdb::DEFAULT_COLUMN_FAMILY_NAME.to_string()]
        }
    }
}

/// Open for snapshotting: read-write first, then read-only if another
/// process holds the engine lock.
pub fn open_source(path: &Path) -> Result<SourceDb, Error> {
    let cfs = column_families(path);
    let opts = Options::default();
    match DB::open_cf(&opts, path, &cfs) {
        Ok(db) => Ok(SourceDb {
            db,
            read_only: false,
        }),
        Err(e) => {
            debug!(
                "Read-write open of {} failed, retrying read-only: {}",
                path.display(),
                e
            );
            let db = DB::open_cf_for_read_only(&opts, path, &cfs, false)?;
            Ok(SourceDb {
                db,
                read_only: true,
            })
        }
    }
}

pub fn open_read_only(path: &Path) -> Result<DB, Error> {
    let cfs = column_families(path);
    Ok(DB::open_cf_for_read_only(&Options::default(), path, &cfs, false)?)
}

/// WAL segments, manifests, `CURRENT` and table files.
pub fn is_critical_file(name: &str) -> bool {
    name == "CURRENT"
        || name.starts_with("MANIFEST-")
        || name.ends_with(".log")
        || name.ends_with(".sst")
}

/// Critical source files with no same-named counterpart in `checkpoint`.
pub fn missing_critical_files(source: &Path, checkpoint: &Path) -> Result<Vec<String>, Error> {
    let mut missing = Vec::new();
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file()
            && is_critical_file(&name)
            && !checkpoint.join(&name).exists()
        {
            missing.push(name);
        }
    }
    missing.sort();
    Ok(missing)
}

/// Writable handle for the snapshot stages. A read-only fallback means another
/// process owns the store, and its file deletions cannot be paused from here.
fn open_for_snapshot(ctx: &StageContext<'_>, method: BackupMethod) -> Result<DB, Error> {
    let source = open_source(&ctx.item.path)?;
    if source.read_only {
        return Err(Error::UnsafeOperation(format!(
            "{} of {}: store is held open by another process",
            method, ctx.item.display_name
        )));
    }
    Ok(source.db)
}

pub fn checkpoint(ctx: &StageContext<'_>) -> Result<(), Error> {
    let source = open_for_snapshot(ctx, BackupMethod::Checkpoint)?;
    Checkpoint::new(&source)?.create_checkpoint(ctx.target)?;
    // Release the handle so obsolete files are purged before comparing listings.
    drop(source);

    let missing = missing_critical_files(&ctx.item.path, ctx.target)?;
    if !missing.is_empty() {
        files::remove_path(ctx.target)?;
        return Err(Error::Other(format!(
            "checkpoint of {} is incomplete, missing: {}",
            ctx.item.display_name,
            missing.join(", ")
        )));
    }
    Ok(())
}

pub fn backup_engine(ctx: &StageContext<'_>) -> Result<(), Error> {
    let source = open_for_snapshot(ctx, BackupMethod::BackupEngine)?;
    let env = Env::new()?;
    let options = BackupEngineOptions::new(ctx.target)?;
    let mut engine = BackupEngine::open(&options, &env)?;
    engine.create_new_backup_flush(&source, true)?;

    let newest = engine
        .get_backup_info()
        .into_iter()
        .max_by_key(|info| info.backup_id);
    if let Some(info) = newest {
        match engine.verify_backup(info.backup_id) {
            Ok(()) => debug!(
                "Backup {} of {} verified ({} files)",
                info.backup_id, ctx.item.display_name, info.num_files
            ),
            Err(e) => warn!(
                "Backup engine verification failed for {}, keeping backup: {}",
                ctx.item.display_name, e
            ),
        }
    }
    Ok(())
}

pub fn is_backup_engine_dir(path: &Path) -> bool {
    path.join("meta").is_dir() && path.join("private").is_dir()
}

/// Restore the newest backup in `backup_dir` as a plain store at `restore_dir`.
pub fn restore_latest(backup_dir: &Path, restore_dir: &Path) -> Result<(), Error> {
    let env = Env::new()?;
    let options = BackupEngineOptions::new(backup_dir)?;
    let mut engine = BackupEngine::open(&options, &env)?;
    engine.restore_from_latest_backup(restore_dir, restore_dir, &RestoreOptions::default())?;
    Ok(())
}

pub fn file_copy(ctx: &StageContext<'_>) -> Result<(), Error> {
    refuse_if_locked(ctx, BackupMethod::FileCopy)?;
    let copied = files::copy_top_level_files(&ctx.item.path, ctx.target)?;
    debug!("Copied {} bytes of {}", copied, ctx.item.display_name);
    Ok(())
}

pub fn record_copy(ctx: &StageContext<'_>) -> Result<(), Error> {
    refuse_if_locked(ctx, BackupMethod::RecordCopy)?;

    let cfs = column_families(&ctx.item.path);
    let source = DB::open_cf_for_read_only(&Options::default(), &ctx.item.path, &cfs, false)?;

    let mut target_opts = Options::default();
    target_opts.create_if_missing(true);
    target_opts.create_missing_column_families(true);
    let target = DB::open_cf(&target_opts, ctx.target, &cfs)?;

    let mut processed: u64 = 0;
    for name in &cfs {
        let (Some(src_cf), Some(dst_cf)) = (source.cf_handle(name), target.cf_handle(name)) else {
            return Err(Error::Other(format!("column family '{}' is not available", name)));
        };

        let mut batch = WriteBatch::default();
        for entry in source.iterator_cf(src_cf, IteratorMode::Start) {
            let (key, value) = entry?;
            batch.put_cf(dst_cf, key, value);
            processed += 1;

            if batch.len() >= RECORD_BATCH_SIZE {
                target.write(std::mem::take(&mut batch))?;
            }
            if processed % RECORD_PROGRESS_INTERVAL == 0 {
                ctx.reporter.on_record_progress(processed, 0);
            }
        }
        if !batch.is_empty() {
            target.write(batch)?;
        }
    }

    target.flush()?;
    ctx.reporter.on_record_progress(processed, processed);
    info!(
        "Copied {} records of {} record by record",
        processed, ctx.item.display_name
    );
    Ok(())
}
