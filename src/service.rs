//! Ingestion service: a pool of workers on one durable consumer

use crate::consumer::IngestionConsumer;
use crate::error::Result;
use crate::provider::QueueProvider;
use crate::store::{AuditStore, MemoryAuditStore, PgAuditStore, PgStoreConfig};
use crate::types::ConsumerOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Open the configured store: PostgreSQL when a url is set, memory otherwise
pub async fn open_store(config: &PgStoreConfig) -> Result<Arc<dyn AuditStore>> {
    if config.url.trim().is_empty() {
        tracing::warn!("No database url configured, audit records are kept in memory only");
        return Ok(Arc::new(MemoryAuditStore::new()));
    }
    Ok(Arc::new(PgAuditStore::connect(config).await?))
}

/// Runs `workers` copies of an [`IngestionConsumer`], each with its own
/// subscription on the same durable consumer
pub struct IngestionService {
    provider: Arc<dyn QueueProvider>,
    consumer: IngestionConsumer,
    consumer_name: String,
    options: ConsumerOptions,
    workers: usize,
}

impl IngestionService {
    pub fn new(
        provider: Arc<dyn QueueProvider>,
        consumer: IngestionConsumer,
        consumer_name: impl Into<String>,
        options: ConsumerOptions,
        workers: usize,
    ) -> Self {
        Self {
            provider,
            consumer,
            consumer_name: consumer_name.into(),
            options,
            workers: workers.max(1),
        }
    }

    /// Subscribe every worker, then spawn them
    ///
    /// Fails without spawning anything if a subscription cannot be created.
    pub async fn start(&self) -> Result<IngestionHandle> {
        let mut subscriptions = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            subscriptions.push(
                self.provider
                    .subscribe_durable(&self.consumer_name, &self.options)
                    .await?,
            );
        }

        let (shutdown, rx) = watch::channel(false);
        let liveness = WorkerLiveness::new(self.workers);
        let tasks = subscriptions
            .into_iter()
            .enumerate()
            .map(|(worker, subscription)| {
                let consumer = self.consumer.clone();
                let mut rx = rx.clone();
                let running = RunningGuard(Arc::clone(&liveness.running));
                tokio::spawn(async move {
                    let _running = running;
                    tracing::debug!(worker, "Ingestion worker started");
                    consumer
                        .run(subscription, async move {
                            // A dropped sender also means shutdown
                            let _ = rx.wait_for(|stop| *stop).await;
                        })
                        .await;
                    tracing::debug!(worker, "Ingestion worker stopped");
                })
            })
            .collect();

        tracing::info!(
            workers = self.workers,
            consumer = %self.consumer_name,
            queue = self.provider.queue_name(),
            provider = self.provider.name(),
            "Ingestion started"
        );

        Ok(IngestionHandle {
            shutdown,
            tasks,
            liveness,
        })
    }
}

/// Count of ingestion workers still running, shared with the health check
#[derive(Debug, Clone)]
pub struct WorkerLiveness {
    started: usize,
    running: Arc<AtomicUsize>,
}

impl WorkerLiveness {
    fn new(started: usize) -> Self {
        Self {
            started,
            running: Arc::new(AtomicUsize::new(started)),
        }
    }

    /// Workers spawned
    pub fn started(&self) -> usize {
        self.started
    }

    /// Workers that have not exited yet
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Whether at least one worker is still consuming
    pub fn is_alive(&self) -> bool {
        self.running() > 0
    }
}

// Decrements on every exit path, panics included
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let left = self.0.fetch_sub(1, Ordering::AcqRel) - 1;
        if left == 0 {
            tracing::warn!("All ingestion workers have stopped");
        }
    }
}

/// Handle to running ingestion workers
pub struct IngestionHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    liveness: WorkerLiveness,
}

impl IngestionHandle {
    /// Number of workers
    pub fn workers(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every worker has exited (e.g. the subscription closed)
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    /// Shared view of how many workers are still running
    pub fn liveness(&self) -> WorkerLiveness {
        self.liveness.clone()
    }

    /// Stop the workers between messages and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Ingestion worker panicked");
            }
        }
        tracing::info!("Ingestion stopped");
    }
}
