//! # Recall Infrastructure
//!
//! Tier adapters: PostgreSQL persistent store, Redis distributed cache and
//! the JSON file fallback store.

pub mod cache;
pub mod database;
pub mod fallback;

pub use cache::RedisCache;
pub use database::{create_pool, PgPersistentStore};
pub use fallback::FallbackFileStore;
