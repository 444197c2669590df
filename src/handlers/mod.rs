//! Example consumers keeping in-memory copies of two tables.

pub mod config_cache;
pub mod user_cache;

pub use config_cache::{ConfigCache, ConfigRow};
pub use user_cache::{UserCache, UserRow};
