//! # Recall Shared
//!
//! Configuration, telemetry and constants shared by every recall crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod telemetry;

pub use config::AppConfig;
pub use error::AppError;
