//! In-process cache tier

pub mod local;

pub use local::LocalCache;
