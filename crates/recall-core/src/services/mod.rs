//! Coordinators and background workers

pub mod availability;
pub mod context_coordinator;
pub mod durable_history;
pub mod memory_coordinator;
pub mod write_queue;

pub use context_coordinator::{ContextCoordinator, ContextCoordinatorBuilder, ContextStats};
pub use durable_history::DurableHistory;
pub use memory_coordinator::{CleanupReport, MemoryCoordinator, MemoryStats};
pub use write_queue::{AppendTurn, DurableWriteQueue, QueueStats};
