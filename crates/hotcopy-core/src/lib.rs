pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod lock;
pub mod model;
pub mod progress;
pub mod scanner;
pub mod scheduler;
pub mod strategy;
pub mod verify;

pub use config::AppConfig;
pub use engine::HotcopyEngine;
pub use error::Error;
pub use model::{
    BackupMethod, BackupOutcome, DiscoveredItem, LockStatus, StoreKind, VerificationResult,
};
pub use progress::{ProgressReporter, SilentReporter};
pub use scheduler::{CancelToken, RunReport};
