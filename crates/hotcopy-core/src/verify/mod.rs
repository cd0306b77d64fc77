pub mod kv;
pub mod log;
pub mod sql;

use crate::model::{DiscoveredItem, StoreKind, VerificationResult};
use std::path::Path;
use tracing::{debug, warn};

/// Compare a finished backup at `target` against its source.
///
/// Never fails: errors raised while comparing become a failed result whose
/// reason carries the error text.
pub fn verify(item: &DiscoveredItem, target: &Path) -> VerificationResult {
    let result = match item.kind {
        StoreKind::KvEngine => kv::verify_kv(&item.path, target),
        StoreKind::EmbeddedSql => sql::verify_sql(&item.path, target),
        StoreKind::LogFile => log::verify_log(&item.path, target),
        StoreKind::Unknown => Ok(VerificationResult::fail("no verifier for unknown stores")),
    };

    let result = result.unwrap_or_else(|e| VerificationResult::fail(e.to_string()));
    match &result.reason {
        None => debug!("Verified {}", item.display_name),
        Some(reason) => warn!("Verification of {} failed: {}", item.display_name, reason),
    }
    result
}
