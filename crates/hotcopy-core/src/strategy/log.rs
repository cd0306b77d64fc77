use super::{refuse_if_locked, StageContext};
use crate::error::Error;
use crate::model::BackupMethod;
use std::fs;
use tracing::debug;

/// Byte copy of a log file; `fs::copy` carries the permission bits over.
pub fn log_copy(ctx: &StageContext<'_>) -> Result<(), Error> {
    refuse_if_locked(ctx, BackupMethod::LogCopy)?;
    let copied = fs::copy(&ctx.item.path, ctx.target)?;
    debug!("Copied {} bytes of {}", copied, ctx.item.display_name);
    Ok(())
}
