//! Durable write queue
//!
//! Context updates return once the caches are written; the durable append is
//! handed to this queue. Jobs are sharded by user key onto single-worker
//! bounded channels, so writes for one user are applied in enqueue order.

use flume::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WriteQueueConfig;
use crate::domain::{Message, NewMessage};
use crate::error::TierResult;
use crate::repositories::PersistentStore;

/// Append one exchange to the user's active conversation.
#[derive(Debug, Clone)]
pub struct AppendTurn {
    pub user_key: String,
    pub session_token: String,
    /// Durable session row, when the context already knows it.
    pub session_id: Option<Uuid>,
    pub messages: Vec<Message>,
}

#[derive(Default)]
struct QueueMetrics {
    enqueued: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Progress of a job across retries; retries resume after the last applied message.
#[derive(Default)]
struct JobProgress {
    conversation_id: Option<Uuid>,
    applied: usize,
}

pub struct DurableWriteQueue {
    senders: RwLock<Vec<Sender<AppendTurn>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<QueueMetrics>,
}

impl DurableWriteQueue {
    /// Spawn the workers on the current tokio runtime.
    pub fn new(store: Arc<dyn PersistentStore>, config: WriteQueueConfig) -> Self {
        let worker_count = config.workers.max(1);
        let metrics = Arc::new(QueueMetrics::default());

        info!(
            "Initializing DurableWriteQueue: workers={}, capacity={}, max_retries={}",
            worker_count, config.capacity, config.max_retries
        );

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (sender, receiver) = bounded(config.capacity.max(1));
            let store = store.clone();
            let config = config.clone();
            let metrics = metrics.clone();

            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, store, receiver, config, metrics).await;
            }));
            senders.push(sender);
        }

        Self {
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            metrics,
        }
    }

    /// Non-blocking; a full shard drops the job.
    pub fn enqueue(&self, job: AppendTurn) -> bool {
        let senders = self.senders.read();
        if senders.is_empty() {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Write queue shut down, dropping turn for {}", job.user_key);
            return false;
        }

        let shard = shard_for(&job.user_key, senders.len());
        match senders[shard].try_send(job) {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Write queue shard {} full, dropping turn for {}",
                    shard, job.user_key
                );
                false
            }
        }
    }

    /// Jobs waiting in all shards.
    pub fn pending(&self) -> usize {
        self.senders.read().iter().map(|s| s.len()).sum()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.metrics.enqueued.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            retried: self.metrics.retried.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close every shard and wait until queued jobs are drained.
    pub async fn shutdown(&self) {
        self.senders.write().clear();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in futures::future::join_all(handles).await {
            if let Err(e) = handle {
                error!("Write queue worker panicked: {}", e);
            }
        }
        info!("Write queue drained: {:?}", self.stats());
    }

    async fn worker_loop(
        worker_id: usize,
        store: Arc<dyn PersistentStore>,
        receiver: Receiver<AppendTurn>,
        config: WriteQueueConfig,
        metrics: Arc<QueueMetrics>,
    ) {
        debug!("Write queue worker {} started", worker_id);

        while let Ok(job) = receiver.recv_async().await {
            Self::run_with_retry(worker_id, store.as_ref(), &job, &config, &metrics).await;
        }

        debug!("Write queue worker {} shutting down (channel closed)", worker_id);
    }

    async fn run_with_retry(
        worker_id: usize,
        store: &dyn PersistentStore,
        job: &AppendTurn,
        config: &WriteQueueConfig,
        metrics: &QueueMetrics,
    ) {
        let mut progress = JobProgress::default();
        let mut attempt = 0;

        loop {
            match Self::apply(store, job, &mut progress).await {
                Ok(()) => {
                    metrics.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Worker {} persisted {} messages for {}",
                        worker_id,
                        job.messages.len(),
                        job.user_key
                    );
                    return;
                }
                Err(e) if e.is_transient() && attempt < config.max_retries => {
                    metrics.retried.fetch_add(1, Ordering::Relaxed);
                    let delay = jittered(config.backoff_for(attempt));
                    warn!(
                        "Worker {} write for {} failed (attempt {}), retrying in {:?}: {}",
                        worker_id,
                        job.user_key,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Worker {} gave up persisting turn for {} after {} attempts: {}",
                        worker_id,
                        job.user_key,
                        attempt + 1,
                        e
                    );
                    return;
                }
            }
        }
    }

    async fn apply(
        store: &dyn PersistentStore,
        job: &AppendTurn,
        progress: &mut JobProgress,
    ) -> TierResult<()> {
        let conversation_id = match progress.conversation_id {
            Some(id) => id,
            None => {
                let session_id = match job.session_id {
                    Some(id) => id,
                    None => {
                        let user = store.get_or_create_user(&job.user_key).await?;
                        store
                            .get_or_create_session(user.id, &job.session_token)
                            .await?
                            .id
                    }
                };
                let conversation = store.get_or_create_active_conversation(session_id).await?;
                progress.conversation_id = Some(conversation.id);
                conversation.id
            }
        };

        for message in &job.messages[progress.applied..] {
            store
                .add_message(conversation_id, NewMessage::from(message))
                .await?;
            progress.applied += 1;
        }

        store.refresh_message_count(conversation_id).await?;
        Ok(())
    }
}

fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

/// ±20 % jitter.
fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..=1.2);
    delay.mul_f64(factor)
}
