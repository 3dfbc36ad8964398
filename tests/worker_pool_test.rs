use queue_workers::queue::memory::{MemoryQueue, MemoryTxManager};
use queue_workers::queue::{QueueClient, QueueItem, TaskType, Tx, TxManager};
use queue_workers::task::TestTask;
use queue_workers::{Config, Event, QueueWorkerError, TenantManager, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// Worker sleep long enough that the 500ms startup jitter stays well inside
/// the 5x liveness threshold; recycle assertions need exact worker ids.
const WORKER_SLEEP_MS: u64 = 400;

fn test_config(max_workers: usize) -> Config {
    Config {
        max_workers,
        worker_sleep_ms: WORKER_SLEEP_MS,
        pool_sleep_ms: 100,
        lease_time_ms: 60_000,
    }
}

async fn start_pool(
    queue: Arc<MemoryQueue>,
    max_workers: usize,
) -> (WorkerPool, mpsc::Receiver<Event>) {
    let mut pool = WorkerPool::new(
        &test_config(max_workers),
        queue,
        Arc::new(MemoryTxManager::new()),
        Arc::new(TenantManager::new()),
    );

    let (listener, events) = mpsc::channel(64);
    pool.subscribe(listener).await;
    pool.start().await.unwrap();
    (pool, events)
}

async fn enqueue_test_task(queue: &MemoryQueue, task: &TestTask) -> String {
    let mut tx = MemoryTxManager::new().start_tx().await.unwrap();
    let item = QueueItem::new(TaskType::Test, task.to_bytes().unwrap());
    let item_id = item.id.clone();
    queue.enqueue(tx.as_mut(), item).await.unwrap();
    tx.commit().await.unwrap();
    item_id
}

/// Poll until the original worker id 0 has been replaced
async fn wait_for_recycle(pool: &WorkerPool) -> Vec<u64> {
    timeout(Duration::from_secs(20), async {
        loop {
            let ids = pool.worker_ids().await;
            if !ids.contains(&0) {
                return ids;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("silent worker was never recycled")
}

#[tokio::test]
async fn test_pool_spawns_max_workers() {
    let queue = Arc::new(MemoryQueue::new());
    let (pool, _events) = start_pool(queue, 3).await;

    assert_eq!(pool.worker_count().await, 3);
    assert_eq!(pool.worker_ids().await, vec![0, 1, 2]);
    pool.stop().await;
}

#[tokio::test]
async fn test_pool_start_twice_fails() {
    let queue = Arc::new(MemoryQueue::new());
    let (mut pool, _events) = start_pool(queue, 1).await;

    let result = pool.start().await;
    assert!(matches!(result, Err(QueueWorkerError::PoolError(_))));
    pool.stop().await;
}

#[tokio::test]
async fn test_forced_worker_stop_triggers_recycle() {
    let queue = Arc::new(MemoryQueue::new());
    let task = TestTask {
        should_stop_worker: true,
        ..Default::default()
    };
    let item_id = enqueue_test_task(&queue, &task).await;

    let (pool, mut events) = start_pool(queue.clone(), 1).await;

    // Worker 0 hits the stop flag, exits, and the supervisor replaces it
    let ids = wait_for_recycle(&pool).await;
    assert_eq!(ids, vec![1]);
    assert_eq!(pool.worker_count().await, 1);

    // The requeued item carries the cleared flag, so the replacement
    // worker completes it
    let event = timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for the replacement worker")
        .expect("event channel closed");
    assert!(event.success);
    assert_eq!(event.item.id, item_id);
    assert_eq!(event.item.error_count, 1);
    assert!(queue.is_empty().await);
    pool.stop().await;
}

#[tokio::test]
async fn test_blocked_worker_recycled_on_heartbeat_loss() {
    let queue = Arc::new(MemoryQueue::new());
    // A handler sleeping past the liveness threshold goes silent without
    // exiting
    let task = TestTask {
        sleep: Duration::from_secs(4),
        ..Default::default()
    };
    let item_id = enqueue_test_task(&queue, &task).await;

    let (pool, mut events) = start_pool(queue.clone(), 1).await;

    let ids = wait_for_recycle(&pool).await;
    assert_eq!(ids, vec![1]);
    assert_eq!(pool.worker_count().await, 1);

    // The doomed worker still finishes its in-flight handler before it
    // observes the stop token
    let event = timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for the blocked worker to finish")
        .expect("event channel closed");
    assert!(event.success);
    assert_eq!(event.item.id, item_id);
    assert_eq!(pool.worker_count().await, 1);
    pool.stop().await;
}

#[tokio::test]
async fn test_stop_halts_processing() {
    let queue = Arc::new(MemoryQueue::new());
    let (pool, mut events) = start_pool(queue.clone(), 2).await;

    pool.stop().await;
    // Workers observe the token at their next loop head
    sleep(Duration::from_millis(1200)).await;

    // Work enqueued after shutdown is never picked up
    enqueue_test_task(&queue, &TestTask::default()).await;
    sleep(Duration::from_millis(1200)).await;

    assert_eq!(queue.size().await, 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let queue = Arc::new(MemoryQueue::new());
    let (pool, _events) = start_pool(queue, 1).await;

    pool.stop().await;
    // A second stop must not block or panic
    pool.stop().await;
}
