pub mod classify;
pub mod walk;

pub use classify::classify;
pub use walk::{discover, discover_all, Discovery, GlobFilter};
