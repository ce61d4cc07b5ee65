//! Degraded file-based history backend

pub mod file_store;

pub use file_store::FallbackFileStore;
