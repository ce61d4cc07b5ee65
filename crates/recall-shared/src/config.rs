//! Configuration management

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::constants::*;
use crate::error::AppError;

#[derive(Debug, Deserialize, Serialize, Clone, Default, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub database: DatabaseSettings,
    #[validate(nested)]
    pub redis: RedisSettings,
    #[validate(nested)]
    pub context: ContextSettings,
    #[validate(nested)]
    pub memory: MemorySettings,
    #[validate(nested)]
    pub write_queue: WriteQueueSettings,
    pub logging: LogSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// `disable`, `prefer`, `require`, ...
    pub ssl_mode: String,
    /// Connections kept open permanently.
    #[validate(range(min = 1))]
    pub pool_size: u32,
    /// Extra connections allowed on top of `pool_size` under load.
    pub max_overflow: u32,
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub op_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "recall".to_string(),
            user: "recall".to_string(),
            password: String::new(),
            ssl_mode: "prefer".to_string(),
            pool_size: 10,
            max_overflow: 20,
            connect_timeout_secs: 5,
            op_timeout_secs: 10,
        }
    }
}

impl DatabaseSettings {
    /// Build the PostgreSQL connection URL from the individual fields.
    pub fn connection_url(&self) -> String {
        let credentials = if self.password.is_empty() {
            self.user.clone()
        } else {
            format!("{}:{}", self.user, self.password)
        };

        let mut url = format!(
            "postgres://{}@{}:{}/{}",
            credentials, self.host, self.port, self.name
        );

        if self.ssl_mode != "disable" {
            url.push_str(&format!("?sslmode={}", self.ssl_mode));
        }

        url
    }

    /// Upper bound of the pool: fixed size plus bounded overflow.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct RedisSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: usize,
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub op_timeout_ms: u64,
    #[validate(length(min = 1))]
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            max_connections: 20,
            connect_timeout_ms: 500,
            op_timeout_ms: 250,
            key_prefix: "context".to_string(),
        }
    }
}

impl RedisSettings {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(pw) if !pw.is_empty() => {
                format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct ContextSettings {
    /// Messages loaded on a cold read; the in-memory window holds twice this.
    #[validate(range(min = 1))]
    pub max_history: usize,
    #[validate(range(min = 1))]
    pub cache_ttl_secs: u64,
    pub unavailable_cooldown_secs: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            unavailable_cooldown_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct MemorySettings {
    pub use_persistent_store: bool,
    pub storage_path: PathBuf,
    #[validate(range(min = 1))]
    pub retention_days: i64,
    #[validate(range(min = 1))]
    pub max_entries: usize,
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            use_persistent_store: true,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_entries: DEFAULT_MAX_ENTRIES,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
#[serde(default)]
pub struct WriteQueueSettings {
    #[validate(range(min = 1, max = 64))]
    pub workers: usize,
    /// Pending jobs per worker before new jobs are dropped.
    #[validate(range(min = 1))]
    pub capacity: usize,
    pub max_retries: u32,
    #[validate(range(min = 1))]
    pub base_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub max_backoff_ms: u64,
}

impl Default for WriteQueueSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 256,
            max_retries: 5,
            base_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Directory for the daily rolling log file; stdout only when unset.
    pub directory: Option<PathBuf>,
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            directory: None,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `config/default`, `config/{RECALL_ENV}` and `RECALL_*` env vars.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let env = std::env::var(ENV_SELECTOR).unwrap_or_else(|_| DEFAULT_ENV.into());
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false));

        Self::finish(builder)
    }

    /// Load from an inline TOML document, still honouring env overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, AppError> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::finish(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, AppError> {
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: AppConfig = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}
