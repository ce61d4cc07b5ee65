//! Distributed cache adapters

pub mod redis_cache;

pub use redis_cache::RedisCache;
