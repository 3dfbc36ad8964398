//! Background queue workers
//!
//! A worker pulls one item at a time from the queue under lease, executes the
//! task and reports success or failure. Leases make processing mutually
//! exclusive across workers; the worker's own consecutive-error counter
//! quarantines it after too many failures in a row.

/// Worker pool supervisor
pub mod pool;

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::index::{BuildProgress, SecondaryIndexer};
use crate::metadata::{DatabaseName, IndexState, TenantManager};
use crate::queue::{QueueClient, QueueItem, TaskType, Tx, TxManager};
use crate::task::{IndexBuildTask, TestTask};

/// Consecutive failures after which a worker quarantines itself, and failed
/// attempts after which an item is dead-lettered
pub const MAX_ERROR_COUNT: u32 = 10;

/// Default duration of the lease taken on a queue item
pub const LEASE_TIME: Duration = Duration::from_secs(60);

/// Number of queue head items fetched per poll to pick a candidate from
pub const PEEK_JOB_ITEMS: usize = 5;

/// Upper bound of the randomized startup/idle jitter, in milliseconds
const JITTER_MS: u64 = 500;

/// Completion report emitted after a terminal processing outcome
#[derive(Debug, Clone)]
pub struct Event {
    /// Whether the item completed successfully
    pub success: bool,
    /// Snapshot of the processed item
    pub item: QueueItem,
    /// Id of the worker that processed it
    pub worker_id: u64,
}

/// A single queue worker
pub struct Worker {
    id: u64,
    queue: Arc<dyn QueueClient>,
    tx_mgr: Arc<dyn TxManager>,
    tenant_mgr: Arc<TenantManager>,
    err_count: u32,
    /// Shutdown signal; a single token observed at the next loop head
    done: Arc<Notify>,
    /// How long the worker sleeps between queue polls
    sleep_time: Duration,
    lease_time: Duration,
    item_event: mpsc::Sender<Event>,
    heartbeat: mpsc::Sender<u64>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        queue: Arc<dyn QueueClient>,
        tx_mgr: Arc<dyn TxManager>,
        tenant_mgr: Arc<TenantManager>,
        sleep_time: Duration,
        lease_time: Duration,
        item_event: mpsc::Sender<Event>,
        heartbeat: mpsc::Sender<u64>,
    ) -> Self {
        Self {
            id,
            queue,
            tx_mgr,
            tenant_mgr,
            err_count: 0,
            done: Arc::new(Notify::new()),
            sleep_time,
            lease_time,
            item_event,
            heartbeat,
        }
    }

    /// Handle the pool uses to signal this worker
    pub(crate) fn stop_handle(&self) -> Arc<Notify> {
        self.done.clone()
    }

    /// Signal the worker to shut down at its next loop head
    pub fn stop(&self) {
        self.done.notify_one();
    }

    /// A slightly random delay on top of the base sleep so that N workers
    /// started together do not poll the queue at the same instant
    async fn jitter_sleep(&self) {
        let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
        tokio::time::sleep(Duration::from_millis(jitter) + self.sleep_time).await;
    }

    /// Run the processing loop until stopped or quarantined
    pub async fn run(mut self) {
        self.jitter_sleep().await;
        info!("Worker {} started", self.id);

        let period = 2 * self.sleep_time;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.done.notified() => {
                    info!("Worker {} shutting down", self.id);
                    return;
                }
                _ = heartbeat.tick() => {
                    // Non-blocking; the pool's ingress channel is buffered.
                    if self.heartbeat.try_send(self.id).is_err() {
                        debug!("Worker {} heartbeat dropped", self.id);
                    }
                }
                _ = std::future::ready(()) => {
                    match self.peek_and_process().await {
                        Ok(()) => self.err_count = 0,
                        Err(err) => {
                            self.err_count += 1;
                            error!("Worker {} error while processing: {}", self.id, err);
                            if self.err_count >= MAX_ERROR_COUNT {
                                error!(
                                    "Worker {} exceeded error count and shutting down",
                                    self.id
                                );
                                return;
                            }
                        }
                    }
                }
            }
            self.jitter_sleep().await;
        }
    }

    /// One poll cycle: lease the queue head, run its handler, report
    async fn peek_and_process(&self) -> crate::Result<()> {
        let mut tx = self.tx_mgr.start_tx().await?;
        let items = self.queue.peek(tx.as_mut(), PEEK_JOB_ITEMS).await?;
        if items.is_empty() {
            return tx.rollback().await;
        }

        // Always take the head candidate. Committing publishes the lease;
        // from here the item is ours for at most lease_time.
        let mut item = self
            .queue
            .obtain_lease(tx.as_mut(), &items[0], self.lease_time)
            .await?;
        debug!("Worker {}: processing task {}", self.id, item.id);
        tx.commit().await?;

        if let Err(err) = self.process_item(&mut item).await {
            error!("Worker {}: failed to process {}: {}", self.id, item.id, err);
            self.handle_failed_processing(&mut item).await?;
            return Err(err);
        }

        info!("Worker {}: completed {}", self.id, item.id);
        self.emit(Event {
            success: true,
            item,
            worker_id: self.id,
        })
        .await;
        Ok(())
    }

    /// Requeue a failed item with linear backoff, or dead-letter it once its
    /// failure count reaches the limit
    async fn handle_failed_processing(&self, item: &mut QueueItem) -> crate::Result<()> {
        item.error_count += 1;
        let mut tx = self.tx_mgr.start_tx().await?;

        if item.error_count >= MAX_ERROR_COUNT {
            error!(
                "Worker {}: max fail count, dropping item {} from the queue",
                self.id, item.id
            );
            self.emit(Event {
                success: false,
                item: item.clone(),
                worker_id: self.id,
            })
            .await;
            self.queue.dequeue(tx.as_mut(), item).await?;
        } else {
            let delay = self.sleep_time * item.error_count;
            self.queue.requeue(tx.as_mut(), item, delay).await?;
        }

        tx.commit().await
    }

    async fn process_item(&self, item: &mut QueueItem) -> crate::Result<()> {
        match item.task_type {
            TaskType::BuildIndex => self.build_index_task(item).await,
            TaskType::Test => self.test_task(item).await,
        }
    }

    /// Synthetic task driving fault-injection scenarios
    async fn test_task(&self, item: &mut QueueItem) -> crate::Result<()> {
        let mut task: TestTask = serde_json::from_slice(&item.data)?;

        if task.should_stop_worker {
            task.should_stop_worker = false;
            item.data = task.to_bytes()?;
            self.stop();
            return Err(crate::QueueWorkerError::TaskFailed(format!(
                "forced worker stop {}",
                self.id
            )));
        }

        if task.num_errors > 0 {
            task.num_errors -= 1;
            item.data = task.to_bytes()?;
            return Err(crate::QueueWorkerError::TaskFailed(format!(
                "test error generated {}",
                task.num_errors
            )));
        }

        tokio::time::sleep(task.sleep).await;

        let mut tx = self.tx_mgr.start_tx().await?;
        self.queue.complete(tx.as_mut(), item).await?;
        tx.commit().await
    }

    /// Build a collection's secondary indexes, renewing the queue lease as
    /// the build progresses, then mark the indexes active
    async fn build_index_task(&self, item: &mut QueueItem) -> crate::Result<()> {
        let task: IndexBuildTask = serde_json::from_slice(&item.data)?;

        let db_name = DatabaseName::with_branch(&task.proj_name, &task.branch);
        let tenant = self.tenant_mgr.get_tenant(task.namespace_id).await?;
        let project = tenant.get_project(&task.proj_name).await?;
        let db = project.get_database(&db_name).await?;
        let coll = db.get_collection(&task.coll_name).await?;

        let mut indexer = SecondaryIndexer::new(coll.clone());
        if let Some(batch_size) = task.batch_size {
            indexer = indexer.with_batch_size(batch_size);
        }
        if let Some(throttle) = task.throttle {
            indexer = indexer.with_throttle(throttle);
        }

        // Extend the lease on every progress report so another worker does
        // not pick the item up mid-build.
        let renewer = LeaseRenewer {
            queue: self.queue.clone(),
            item: item.clone(),
            lease_time: self.lease_time,
        };
        indexer
            .build_collection(self.tx_mgr.as_ref(), &renewer)
            .await?;

        let mut indexes = coll.secondary_indexes().await;
        for index in &mut indexes {
            index.state = IndexState::Active;
        }

        let mut tx = self.tx_mgr.start_tx().await?;
        tenant
            .update_collection_indexes(tx.as_mut(), &db, coll.name(), indexes)
            .await?;
        self.queue.complete(tx.as_mut(), item).await?;
        tx.commit().await
    }

    async fn emit(&self, event: Event) {
        if self.item_event.send(event).await.is_err() {
            debug!("Worker {} event channel closed", self.id);
        }
    }
}

/// Renews the worker's queue lease whenever the index build reports progress
struct LeaseRenewer {
    queue: Arc<dyn QueueClient>,
    item: QueueItem,
    lease_time: Duration,
}

#[async_trait]
impl BuildProgress for LeaseRenewer {
    async fn update(&self, tx: &mut dyn Tx) -> crate::Result<()> {
        self.queue.renew_lease(tx, &self.item, self.lease_time).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::{MemoryQueue, MemoryTxManager};

    fn test_worker(queue: Arc<MemoryQueue>) -> (Worker, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (heartbeat_tx, _heartbeat_rx) = mpsc::channel(8);
        let worker = Worker::new(
            0,
            queue,
            Arc::new(MemoryTxManager::new()),
            Arc::new(TenantManager::new()),
            Duration::from_millis(10),
            Duration::from_secs(60),
            event_tx,
            heartbeat_tx,
        );
        (worker, event_rx)
    }

    #[tokio::test]
    async fn test_error_path_mutates_payload() {
        let queue = Arc::new(MemoryQueue::new());
        let (worker, _events) = test_worker(queue);

        let payload = TestTask {
            num_errors: 2,
            ..Default::default()
        };
        let mut item = QueueItem::new(TaskType::Test, payload.to_bytes().unwrap());

        let err = worker.test_task(&mut item).await.unwrap_err();
        assert!(err.to_string().contains("test error generated"));

        let decoded: TestTask = serde_json::from_slice(&item.data).unwrap();
        assert_eq!(decoded.num_errors, 1);
    }

    #[tokio::test]
    async fn test_forced_stop_clears_flag_and_signals_done() {
        let queue = Arc::new(MemoryQueue::new());
        let (worker, _events) = test_worker(queue);

        let payload = TestTask {
            should_stop_worker: true,
            ..Default::default()
        };
        let mut item = QueueItem::new(TaskType::Test, payload.to_bytes().unwrap());

        let err = worker.test_task(&mut item).await.unwrap_err();
        assert!(err.to_string().contains("forced worker stop"));

        let decoded: TestTask = serde_json::from_slice(&item.data).unwrap();
        assert!(!decoded.should_stop_worker);

        // The stop token must already be latched.
        tokio::time::timeout(Duration::from_millis(50), worker.done.notified())
            .await
            .expect("stop token not latched");
    }
}
