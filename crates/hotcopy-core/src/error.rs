use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] rocksdb::Error),

    #[error("Cannot discover {}: {reason}", path.display())]
    Discovery { path: PathBuf, reason: String },

    #[error("Unsafe operation refused: {0}")]
    UnsafeOperation(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Cancelled before the item was processed")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
