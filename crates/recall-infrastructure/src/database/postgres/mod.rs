//! PostgreSQL implementations

mod rows;
mod store_impl;

pub use store_impl::{escape_like, PgPersistentStore};
