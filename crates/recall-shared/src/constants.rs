//! Application-wide constants

/// Environment variable prefix, e.g. `RECALL_DATABASE__HOST`.
pub const ENV_PREFIX: &str = "RECALL";
pub const ENV_SELECTOR: &str = "RECALL_ENV";
pub const DEFAULT_ENV: &str = "development";

pub const DEFAULT_MAX_HISTORY: usize = 20;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_STORAGE_PATH: &str = "./recall_memory";

/// Conversations older than this are never reused.
pub const ACTIVE_CONVERSATION_WINDOW_HOURS: i64 = 24;

pub const DEFAULT_LOG_FILTER: &str = "info,recall=debug";
