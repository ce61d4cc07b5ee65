//! Database module (PostgreSQL adapters)

pub mod connection;
pub mod postgres;
pub mod schema;

pub use connection::{check_connection, create_pool};
pub use postgres::PgPersistentStore;
