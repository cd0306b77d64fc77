//! Per-kind backup fallback chains.
//!
//! Each store kind maps to an ordered list of methods. [`plan`] applies the
//! configured preference and drops methods that are unsafe for a locked
//! store; [`execute`] runs the remaining stages through [`run_chain`] until
//! one succeeds.

pub mod files;
pub mod kv;
pub mod log;
pub mod sql;

use crate::error::Error;
use crate::model::{BackupMethod, DiscoveredItem, LockStatus, StoreKind};
use crate::progress::ProgressReporter;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything a single stage needs to produce a backup at `target`.
pub struct StageContext<'a> {
    pub item: &'a DiscoveredItem,
    pub target: &'a Path,
    pub lock: &'a LockStatus,
    pub reporter: &'a dyn ProgressReporter,
}

type StageFn = fn(&StageContext<'_>) -> Result<(), Error>;

const KV_CHAIN: [BackupMethod; 4] = [
    BackupMethod::Checkpoint,
    BackupMethod::BackupEngine,
    BackupMethod::FileCopy,
    BackupMethod::RecordCopy,
];
const SQL_CHAIN: [BackupMethod; 2] = [BackupMethod::OnlineExport, BackupMethod::SchemaCopy];
const LOG_CHAIN: [BackupMethod; 1] = [BackupMethod::LogCopy];

pub fn default_chain(kind: StoreKind) -> &'static [BackupMethod] {
    match kind {
        StoreKind::KvEngine => &KV_CHAIN,
        StoreKind::EmbeddedSql => &SQL_CHAIN,
        StoreKind::LogFile => &LOG_CHAIN,
        StoreKind::Unknown => &[],
    }
}

fn stage_fn(method: BackupMethod) -> StageFn {
    match method {
        BackupMethod::Checkpoint => kv::checkpoint,
        BackupMethod::BackupEngine => kv::backup_engine,
        BackupMethod::FileCopy => kv::file_copy,
        BackupMethod::RecordCopy => kv::record_copy,
        BackupMethod::OnlineExport => sql::online_export,
        BackupMethod::SchemaCopy => sql::schema_copy,
        BackupMethod::LogCopy => log::log_copy,
    }
}

/// Ordered stages to attempt, plus the methods withheld because the store is locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub stages: Vec<BackupMethod>,
    pub refused: Vec<BackupMethod>,
}

pub fn plan(kind: StoreKind, lock: &LockStatus, preference: Option<BackupMethod>) -> Plan {
    let mut chain = default_chain(kind).to_vec();

    match preference {
        Some(preferred) if chain.contains(&preferred) => {
            chain.retain(|m| *m != preferred);
            chain.insert(0, preferred);
        }
        Some(preferred) => warn!("Ignoring preferred method {} for a {} store", preferred, kind),
        None => {}
    }

    if !lock.is_locked {
        return Plan {
            stages: chain,
            refused: Vec::new(),
        };
    }

    let (stages, refused): (Vec<_>, Vec<_>) =
        chain.into_iter().partition(|m| m.is_concurrent_safe());
    Plan { stages, refused }
}

/// Try each stage in order until one succeeds; `on_failure` runs after every
/// failed stage. Returns the winning stage's name and value, or the last error.
pub fn run_chain<M, T, F>(
    stages: Vec<(M, F)>,
    mut on_failure: impl FnMut(M, &Error),
) -> Result<(M, T), Error>
where
    M: Copy + fmt::Display,
    F: FnOnce() -> Result<T, Error>,
{
    let mut last_error = None;
    for (name, attempt) in stages {
        match attempt() {
            Ok(value) => return Ok((name, value)),
            Err(e) => {
                on_failure(name, &e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Other("no backup stage available".to_string())))
}

/// Run the planned stages for `item`, writing the backup to `target`.
/// Returns the method that succeeded and the bytes it wrote.
pub fn execute(
    item: &DiscoveredItem,
    target: &Path,
    lock: &LockStatus,
    plan: &Plan,
    reporter: &dyn ProgressReporter,
) -> Result<(BackupMethod, u64), Error> {
    if plan.stages.is_empty() {
        return Err(refusal(item, plan, None));
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let ctx = StageContext {
        item,
        target,
        lock,
        reporter,
    };

    let stages: Vec<_> = plan
        .stages
        .iter()
        .map(|&method| {
            let ctx = &ctx;
            (method, move || {
                files::remove_path(ctx.target)?;
                debug!("Trying {} for {}", method, ctx.item.display_name);
                stage_fn(method)(ctx)
            })
        })
        .collect();

    let result = run_chain(stages, |method, e| {
        warn!(
            "{} failed for {}, falling back: {}",
            method, item.display_name, e
        );
        if let Err(cleanup) = files::remove_path(target) {
            warn!("Cannot remove partial {}: {}", target.display(), cleanup);
        }
    });

    match result {
        Ok((method, ())) => {
            let bytes = files::path_size(target);
            info!(
                "Backed up {} via {} ({} bytes)",
                item.display_name, method, bytes
            );
            Ok((method, bytes))
        }
        Err(e) if !plan.refused.is_empty() => Err(refusal(item, plan, Some(e))),
        Err(e) => Err(e),
    }
}

/// Plan and execute in one call.
pub fn backup_item(
    item: &DiscoveredItem,
    target: &Path,
    lock: &LockStatus,
    preference: Option<BackupMethod>,
    reporter: &dyn ProgressReporter,
) -> Result<(BackupMethod, u64), Error> {
    let plan = plan(item.kind, lock, preference);
    execute(item, target, lock, &plan, reporter)
}

fn refusal(item: &DiscoveredItem, plan: &Plan, last: Option<Error>) -> Error {
    let refused = plan
        .refused
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let mut message = format!(
        "{} is locked; refusing {}",
        item.display_name,
        if refused.is_empty() { "all methods".to_string() } else { refused }
    );
    if let Some(e) = last {
        message.push_str(&format!(" after safe methods failed: {}", e));
    }
    Error::UnsafeOperation(message)
}

/// Guard for stages that must never touch a store another process is writing.
pub(crate) fn refuse_if_locked(ctx: &StageContext<'_>, method: BackupMethod) -> Result<(), Error> {
    if ctx.lock.is_locked {
        return Err(Error::UnsafeOperation(format!(
            "{} of locked {} ({})",
            method, ctx.item.display_name, ctx.lock.diagnostic
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_unlocked_plan_keeps_full_chain() {
        let plan = plan(StoreKind::KvEngine, &LockStatus::unlocked(), None);
        assert_eq!(plan.stages, KV_CHAIN.to_vec());
        assert!(plan.refused.is_empty());
    }

    #[test]
    fn test_locked_kv_plan_is_restricted() {
        let lock = LockStatus::locked("lock-file", "LOCK present");
        let plan = plan(StoreKind::KvEngine, &lock, None);
        assert_eq!(
            plan.stages,
            vec![BackupMethod::Checkpoint, BackupMethod::BackupEngine]
        );
        assert_eq!(
            plan.refused,
            vec![BackupMethod::FileCopy, BackupMethod::RecordCopy]
        );
    }

    #[test]
    fn test_locked_kv_plan_ignores_unsafe_preference() {
        let lock = LockStatus::locked("lock-file", "LOCK present");
        let plan = plan(StoreKind::KvEngine, &lock, Some(BackupMethod::FileCopy));
        assert!(!plan.stages.contains(&BackupMethod::FileCopy));
        assert!(!plan.stages.contains(&BackupMethod::RecordCopy));
    }

    #[test]
    fn test_preference_moves_to_front() {
        let plan = plan(
            StoreKind::KvEngine,
            &LockStatus::unlocked(),
            Some(BackupMethod::RecordCopy),
        );
        assert_eq!(
            plan.stages,
            vec![
                BackupMethod::RecordCopy,
                BackupMethod::Checkpoint,
                BackupMethod::BackupEngine,
                BackupMethod::FileCopy,
            ]
        );
    }

    #[test]
    fn test_foreign_preference_is_ignored() {
        let plan = plan(
            StoreKind::EmbeddedSql,
            &LockStatus::unlocked(),
            Some(BackupMethod::Checkpoint),
        );
        assert_eq!(plan.stages, SQL_CHAIN.to_vec());
    }

    #[test]
    fn test_locked_sql_plan_is_unchanged() {
        let lock = LockStatus::locked("busy", "database is locked");
        let plan = plan(StoreKind::EmbeddedSql, &lock, None);
        assert_eq!(plan.stages, SQL_CHAIN.to_vec());
        assert!(plan.refused.is_empty());
    }

    #[test]
    fn test_locked_log_plan_is_empty() {
        let lock = LockStatus::locked("lock-file", "held");
        let plan = plan(StoreKind::LogFile, &lock, None);
        assert!(plan.stages.is_empty());
        assert_eq!(plan.refused, vec![BackupMethod::LogCopy]);
    }

    #[test]
    fn test_run_chain_stops_at_first_success() {
        let attempted = RefCell::new(Vec::new());
        let log = &attempted;
        let stage = move |name: &'static str, ok: bool| {
            (name, move || {
                log.borrow_mut().push(name);
                if ok {
                    Ok(name.len())
                } else {
                    Err(Error::Other(format!("{} broke", name)))
                }
            })
        };

        let mut failures = Vec::new();
        let result = run_chain(
            vec![stage("first", false), stage("second", true), stage("third", true)],
            |name, _| failures.push(name),
        );

        let (name, value) = result.unwrap();
        assert_eq!(name, "second");
        assert_eq!(value, 6);
        assert_eq!(failures, vec!["first"]);
        assert_eq!(*attempted.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_run_chain_returns_last_error() {
        let stages: Vec<(&str, Box<dyn FnOnce() -> Result<(), Error>>)> = vec![
            ("a", Box::new(|| Err(Error::Other("a broke".to_string())))),
            ("b", Box::new(|| Err(Error::Other("b broke".to_string())))),
        ];
        let err = run_chain(stages, |_, _| {}).unwrap_err();
        assert_eq!(err.to_string(), "b broke");
    }

    #[test]
    fn test_run_chain_empty() {
        let stages: Vec<(&str, fn() -> Result<(), Error>)> = Vec::new();
        assert!(run_chain(stages, |_, _| {}).is_err());
    }
}
