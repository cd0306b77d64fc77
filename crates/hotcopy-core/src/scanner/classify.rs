use crate::model::StoreKind;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// First 16 bytes of every SQLite 3 database file.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

const KV_MARKER_PREFIXES: [&str; 3] = ["CURRENT", "MANIFEST", "LOG"];
const KV_MARKER_SUFFIXES: [&str; 2] = [".sst", ".log"];
const KV_MARKER_THRESHOLD: usize = 2;

const SQL_EXTENSIONS: [&str; 6] = ["db", "sqlite", "sqlite3", "db3", "s3db", "sl3"];
const LOG_EXTENSIONS: [&str; 5] = ["log", "out", "err", "trace", "audit"];
const GENERIC_EXTENSIONS: [&str; 3] = ["", "txt", "dat"];
const LOG_NAME_HINTS: [&str; 9] = [
    "access",
    "error",
    "debug",
    "audit",
    "database",
    "transaction",
    "trace",
    "syslog",
    "event",
];

/// Classify a path by its on-disk structure.
///
/// Precedence: KV engine directory, SQLite file (extension and header),
/// log file (extension or name vocabulary), unknown. Paths that cannot be
/// inspected are unknown.
pub fn classify(path: &Path) -> StoreKind {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("Cannot stat {}: {}", path.display(), e);
            return StoreKind::Unknown;
        }
    };

    if metadata.is_dir() {
        return if is_kv_engine_dir(path) {
            StoreKind::KvEngine
        } else {
            StoreKind::Unknown
        };
    }

    if !metadata.is_file() {
        return StoreKind::Unknown;
    }

    if SQL_EXTENSIONS.contains(&extension_lower(path).as_str()) && has_sqlite_header(path) {
        return StoreKind::EmbeddedSql;
    }

    if is_log_name(path) {
        return StoreKind::LogFile;
    }

    StoreKind::Unknown
}

pub fn is_kv_marker(file_name: &str) -> bool {
    KV_MARKER_PREFIXES
        .iter()
        .any(|prefix| file_name.starts_with(prefix))
        || KV_MARKER_SUFFIXES
            .iter()
            .any(|suffix| file_name.ends_with(suffix))
}

/// True when the directory holds at least two regular files with KV marker names.
pub fn is_kv_engine_dir(dir: &Path) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return false;
        }
    };

    let mut markers = 0;
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_kv_marker(&entry.file_name().to_string_lossy()) {
            markers += 1;
            if markers >= KV_MARKER_THRESHOLD {
                return true;
            }
        }
    }
    false
}

pub fn has_sqlite_header(path: &Path) -> bool {
    let mut header = [0u8; 16];
    match File::open(path).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => &header == SQLITE_HEADER,
        Err(e) => {
            debug!("Cannot read header of {}: {}", path.display(), e);
            false
        }
    }
}

pub fn is_log_name(path: &Path) -> bool {
    let extension = extension_lower(path);
    if LOG_EXTENSIONS.contains(&extension.as_str()) {
        return true;
    }

    let generic = GENERIC_EXTENSIONS.contains(&extension.as_str())
        || extension.chars().all(|c| c.is_ascii_digit());
    if !generic {
        return false;
    }

    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    LOG_NAME_HINTS.iter().any(|hint| file_name.contains(hint))
}

fn extension_lower(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_markers() {
        assert!(is_kv_marker("CURRENT"));
        assert!(is_kv_marker("MANIFEST-000001"));
        assert!(is_kv_marker("LOG.old.1700000000"));
        assert!(is_kv_marker("000042.sst"));
        assert!(is_kv_marker("000007.log"));
        assert!(!is_kv_marker("LOCK"));
        assert!(!is_kv_marker("OPTIONS-000005"));
        assert!(!is_kv_marker("current"));
    }

    #[test]
    fn test_log_extensions() {
        assert!(is_log_name(Path::new("/var/log/app.log")));
        assert!(is_log_name(Path::new("worker.OUT")));
        assert!(is_log_name(Path::new("service.err")));
        assert!(!is_log_name(Path::new("notes.md")));
    }

    #[test]
    fn test_log_vocabulary_needs_generic_extension() {
        assert!(is_log_name(Path::new("access")));
        assert!(is_log_name(Path::new("Error_2024.txt")));
        assert!(is_log_name(Path::new("transaction.dat")));
        assert!(is_log_name(Path::new("debug.3")));
        // vocabulary word but a specific, non-log extension
        assert!(!is_log_name(Path::new("error.rs")));
        assert!(!is_log_name(Path::new("database.json")));
        assert!(!is_log_name(Path::new("readme.txt")));
    }
}
