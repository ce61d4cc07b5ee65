//! Tier ports

pub mod distributed_cache;
pub mod history_backend;
pub mod persistent_store;

pub use distributed_cache::{CacheCounters, DistributedCache};
pub use history_backend::HistoryBackend;
pub use persistent_store::PersistentStore;

#[cfg(test)]
pub use distributed_cache::MockDistributedCache;
#[cfg(test)]
pub use history_backend::MockHistoryBackend;
#[cfg(test)]
pub use persistent_store::MockPersistentStore;
