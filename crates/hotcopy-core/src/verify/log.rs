use crate::error::Error;
use crate::hasher;
use crate::model::VerificationResult;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Files at or above this size are compared by length only.
pub const FULL_HASH_LIMIT: u64 = 256 * 1024 * 1024;

pub fn verify_log(source: &Path, backup: &Path) -> Result<VerificationResult, Error> {
    let source_size = fs::metadata(source)?.len();
    let backup_size = match fs::metadata(backup) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(VerificationResult::fail(format!(
                "backup {} does not exist",
                backup.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    if source_size != backup_size {
        return Ok(VerificationResult::fail(format!(
            "size mismatch: source {} bytes, backup {} bytes",
            source_size, backup_size
        )));
    }

    if source_size >= FULL_HASH_LIMIT {
        debug!(
            "Skipping content hash of {} ({} bytes), sizes match",
            source.display(),
            source_size
        );
        return Ok(VerificationResult::pass());
    }

    let source_hash = hasher::hash_file(source)?;
    let backup_hash = hasher::hash_file(backup)?;
    if source_hash != backup_hash {
        return Ok(VerificationResult::fail(format!(
            "content hash mismatch: source {}, backup {}",
            source_hash.to_hex(),
            backup_hash.to_hex()
        )));
    }
    Ok(VerificationResult::pass())
}
