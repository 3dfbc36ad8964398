//! Transactional job queue interface
//!
//! All queue operations run inside a store transaction; a worker couples the
//! read of the queue head with the lease grant in a single transaction so
//! acquisition is atomic against the store's visibility rules.

/// In-memory queue and transaction manager
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Tag selecting the handler for a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    /// Build a secondary index over a collection
    BuildIndex,
    /// Synthetic task used to drive fault-injection scenarios
    Test,
}

/// A lease granting its holder the exclusive right to process an item
#[derive(Debug, Clone)]
pub struct Lease {
    /// Opaque token identifying the lease holder
    pub holder: Uuid,
    /// Instant after which the lease no longer protects the item
    pub expires_at: Instant,
}

impl Lease {
    /// Whether the lease still protects the item
    pub fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// An item on the background job queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Unique item identifier
    pub id: String,

    /// Handler selector
    pub task_type: TaskType,

    /// Opaque payload, JSON-encoded per task type
    pub data: Vec<u8>,

    /// Number of failed processing attempts, advanced by requeue on failure
    pub error_count: u32,

    /// Item creation timestamp
    pub created_at: DateTime<Utc>,

    /// Current lease, maintained by the store
    pub lease: Option<Lease>,
}

impl QueueItem {
    /// Create a new queue item with the given payload
    pub fn new(task_type: TaskType, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            data,
            error_count: 0,
            created_at: Utc::now(),
            lease: None,
        }
    }
}

/// An active store transaction
#[async_trait]
pub trait Tx: Send {
    /// Commit the transaction, publishing its writes
    async fn commit(&mut self) -> crate::Result<()>;

    /// Roll the transaction back, discarding its writes
    async fn rollback(&mut self) -> crate::Result<()>;
}

/// Source of store transactions
#[async_trait]
pub trait TxManager: Send + Sync {
    /// Start a new transaction
    async fn start_tx(&self) -> crate::Result<Box<dyn Tx>>;
}

/// Transactional operations over the durable job queue
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Append an item to the queue
    async fn enqueue(&self, tx: &mut dyn Tx, item: QueueItem) -> crate::Result<()>;

    /// Return up to `n` items in store order, skipping items with an
    /// unexpired lease or a visibility delay
    async fn peek(&self, tx: &mut dyn Tx, n: usize) -> crate::Result<Vec<QueueItem>>;

    /// Grant the caller the exclusive right to process the item until
    /// `now + duration`; fails if another lease is live
    async fn obtain_lease(
        &self,
        tx: &mut dyn Tx,
        item: &QueueItem,
        duration: Duration,
    ) -> crate::Result<QueueItem>;

    /// Extend the current holder's lease; fails if the caller is not the
    /// holder or the lease has lapsed
    async fn renew_lease(
        &self,
        tx: &mut dyn Tx,
        item: &QueueItem,
        duration: Duration,
    ) -> crate::Result<()>;

    /// Remove the item from the queue after successful processing
    async fn complete(&self, tx: &mut dyn Tx, item: &QueueItem) -> crate::Result<()>;

    /// Return the item to the queue, invisible to peek until `now + delay`.
    /// Persists the caller's mutations of `data` and `error_count` and
    /// releases the lease.
    async fn requeue(
        &self,
        tx: &mut dyn Tx,
        item: &QueueItem,
        delay: Duration,
    ) -> crate::Result<()>;

    /// Remove the item from the queue after terminal failure (dead-letter)
    async fn dequeue(&self, tx: &mut dyn Tx, item: &QueueItem) -> crate::Result<()>;

    /// Current number of items on the queue, leased or not
    async fn size(&self) -> usize;

    /// Check if the queue is empty
    async fn is_empty(&self) -> bool {
        self.size().await == 0
    }
}
