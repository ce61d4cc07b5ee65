//! # Recall Core
//!
//! Domain types, tier ports, and the coordinators that keep per-user
//! conversation state consistent across the local, distributed and durable tiers.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod repositories;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

// Re-export domain entities
pub use domain::*;
pub use error::{Tier, TierError, TierResult};
