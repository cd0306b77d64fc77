use crate::error::Error;
use crate::model::{BackupMethod, StoreKind};
use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_paths: Vec<PathBuf>,
    pub destination: PathBuf,
    pub methods: MethodPreferences,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// 0 means one worker per available CPU.
    pub workers: usize,
    pub verify: bool,
    pub strict: bool,
    pub dry_run: bool,
}

/// Preferred first method per store kind; the rest of the chain keeps its order.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct MethodPreferences {
    pub kv_engine: Option<BackupMethod>,
    pub embedded_sql: Option<BackupMethod>,
    pub log_file: Option<BackupMethod>,
}

impl MethodPreferences {
    pub fn for_kind(&self, kind: StoreKind) -> Option<BackupMethod> {
        match kind {
            StoreKind::KvEngine => self.kv_engine,
            StoreKind::EmbeddedSql => self.embedded_sql,
            StoreKind::LogFile => self.log_file,
            StoreKind::Unknown => None,
        }
    }
}

/// Load `Hotcopy.{json,toml}` from the working directory (optional) and
/// `HOTCOPY_*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, Error> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Hotcopy").required(false))
        .add_source(Environment::with_prefix("HOTCOPY").try_parsing(true))
        .build()?;
    Ok(builder.try_deserialize::<AppConfig>()?)
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}

pub fn effective_workers(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
