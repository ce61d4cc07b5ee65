//! Composition root: connects each tier and degrades when one is missing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use recall_core::config::{ContextConfig, MemoryConfig, WriteQueueConfig};
use recall_core::repositories::{DistributedCache, PersistentStore};
use recall_core::services::{ContextCoordinator, DurableWriteQueue, MemoryCoordinator};
use recall_core::TierError;
use recall_infrastructure::{create_pool, FallbackFileStore, PgPersistentStore, RedisCache};
use recall_shared::AppConfig;

pub struct Services {
    pub store: Option<Arc<dyn PersistentStore>>,
    pub distributed: Option<Arc<dyn DistributedCache>>,
    pub memory: Arc<MemoryCoordinator>,
    context: std::result::Result<ContextCoordinator, TierError>,
    write_queue: Option<Arc<DurableWriteQueue>>,
}

impl Services {
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let store = connect_store(config).await;
        let distributed = connect_cache(config).await;

        let write_queue = store.as_ref().map(|store| {
            Arc::new(DurableWriteQueue::new(
                store.clone(),
                WriteQueueConfig::from(&config.write_queue),
            ))
        });

        let mut context_config = ContextConfig::from(&config.context);
        context_config.key_prefix = config.redis.key_prefix.clone();
        context_config.store_timeout = Duration::from_secs(config.database.op_timeout_secs);

        let mut builder = ContextCoordinator::builder(context_config);
        if let Some(store) = &store {
            builder = builder.store(store.clone());
        }
        if let Some(cache) = &distributed {
            builder = builder.distributed(cache.clone());
        }
        if let Some(queue) = &write_queue {
            builder = builder.write_queue(queue.clone());
        }
        let context = builder.build();

        let mut memory_config = MemoryConfig::from(&config.memory);
        if memory_config.use_persistent_store && store.is_none() {
            warn!("Persistent store unavailable, memory history falls back to files only");
            memory_config.use_persistent_store = false;
        }
        let fallback = Arc::new(FallbackFileStore::new(&memory_config.storage_path));
        let memory = Arc::new(MemoryCoordinator::new(memory_config, store.clone(), fallback)?);

        Ok(Self {
            store,
            distributed,
            memory,
            context,
            write_queue,
        })
    }

    pub fn context(&self) -> Result<&ContextCoordinator> {
        self.context
            .as_ref()
            .map_err(|e| anyhow!("context tier unavailable: {}", e))
    }

    pub fn store(&self) -> Result<&Arc<dyn PersistentStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| anyhow!("persistent store unavailable"))
    }

    /// Drain pending durable writes.
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.write_queue {
            queue.shutdown().await;
        }
    }
}

async fn connect_store(config: &AppConfig) -> Option<Arc<dyn PersistentStore>> {
    match create_pool(&config.database).await {
        Ok(pool) => {
            info!(
                "PostgreSQL connected at {}:{}/{}",
                config.database.host, config.database.port, config.database.name
            );
            let op_timeout = Duration::from_secs(config.database.op_timeout_secs);
            Some(Arc::new(PgPersistentStore::new(pool, op_timeout)))
        }
        Err(e) => {
            warn!("PostgreSQL unavailable: {}", e);
            None
        }
    }
}

async fn connect_cache(config: &AppConfig) -> Option<Arc<dyn DistributedCache>> {
    if !config.redis.enabled {
        info!("Redis disabled by configuration");
        return None;
    }

    match RedisCache::connect(&config.redis).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!("Redis unavailable, continuing without distributed cache: {}", e);
            None
        }
    }
}
