//! In-memory queue

use crate::queue::{Lease, QueueClient, QueueItem, Tx, TxManager};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A queued item together with its visibility state
struct StoredItem {
    item: QueueItem,
    /// Item is hidden from peek until this instant (requeue backoff)
    visible_at: Instant,
}

/// Counters recorded for test assertions
#[derive(Default)]
struct QueueStats {
    lease_grants: u64,
    requeue_delays: Vec<Duration>,
}

/// In-memory queue keeping items in insertion order
///
/// Lease checks and grants happen under a single write-lock acquisition, so
/// the peek-then-lease cycle a worker runs is atomic against other workers.
pub struct MemoryQueue {
    items: Arc<RwLock<Vec<StoredItem>>>,
    stats: Arc<RwLock<QueueStats>>,
}

impl MemoryQueue {
    /// Create a new in-memory queue
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(RwLock::new(QueueStats::default())),
        }
    }

    /// Number of leases granted over the queue's lifetime
    pub async fn lease_grant_count(&self) -> u64 {
        self.stats.read().await.lease_grants
    }

    /// Backoff delays passed to requeue, in call order
    pub async fn requeue_delays(&self) -> Vec<Duration> {
        self.stats.read().await.requeue_delays.clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn lease_is_live(item: &QueueItem, now: Instant) -> bool {
    item.lease.as_ref().is_some_and(|lease| lease.is_live(now))
}

/// Terminal removals must come from the lease holder while a lease is live
fn check_holder(stored: &QueueItem, caller: &QueueItem, now: Instant) -> crate::Result<()> {
    if let Some(lease) = &stored.lease {
        if lease.is_live(now) {
            let held = caller
                .lease
                .as_ref()
                .is_some_and(|own| own.holder == lease.holder);
            if !held {
                return Err(crate::QueueWorkerError::LeaseNotHeld(caller.id.clone()));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn enqueue(&self, _tx: &mut dyn Tx, item: QueueItem) -> crate::Result<()> {
        let mut items = self.items.write().await;
        debug!("Item {} enqueued as {:?}", item.id, item.task_type);
        items.push(StoredItem {
            item,
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn peek(&self, _tx: &mut dyn Tx, n: usize) -> crate::Result<Vec<QueueItem>> {
        let items = self.items.read().await;
        let now = Instant::now();

        Ok(items
            .iter()
            .filter(|stored| stored.visible_at <= now && !lease_is_live(&stored.item, now))
            .take(n)
            .map(|stored| stored.item.clone())
            .collect())
    }

    async fn obtain_lease(
        &self,
        _tx: &mut dyn Tx,
        item: &QueueItem,
        duration: Duration,
    ) -> crate::Result<QueueItem> {
        let mut items = self.items.write().await;
        let now = Instant::now();

        let stored = items
            .iter_mut()
            .find(|stored| stored.item.id == item.id)
            .ok_or_else(|| crate::QueueWorkerError::ItemNotFound(item.id.clone()))?;

        if lease_is_live(&stored.item, now) {
            warn!("Lease contention on item {}", item.id);
            return Err(crate::QueueWorkerError::LeaseHeld(item.id.clone()));
        }

        stored.item.lease = Some(Lease {
            holder: Uuid::new_v4(),
            expires_at: now + duration,
        });
        self.stats.write().await.lease_grants += 1;
        Ok(stored.item.clone())
    }

    async fn renew_lease(
        &self,
        _tx: &mut dyn Tx,
        item: &QueueItem,
        duration: Duration,
    ) -> crate::Result<()> {
        let mut items = self.items.write().await;
        let now = Instant::now();

        let stored = items
            .iter_mut()
            .find(|stored| stored.item.id == item.id)
            .ok_or_else(|| crate::QueueWorkerError::ItemNotFound(item.id.clone()))?;

        let holder = item
            .lease
            .as_ref()
            .map(|lease| lease.holder)
            .ok_or_else(|| crate::QueueWorkerError::LeaseNotHeld(item.id.clone()))?;

        match &mut stored.item.lease {
            Some(lease) if lease.holder == holder && lease.is_live(now) => {
                lease.expires_at = now + duration;
                Ok(())
            }
            _ => Err(crate::QueueWorkerError::LeaseNotHeld(item.id.clone())),
        }
    }

    async fn complete(&self, _tx: &mut dyn Tx, item: &QueueItem) -> crate::Result<()> {
        let mut items = self.items.write().await;
        let now = Instant::now();

        let pos = items
            .iter()
            .position(|stored| stored.item.id == item.id)
            .ok_or_else(|| crate::QueueWorkerError::ItemNotFound(item.id.clone()))?;

        check_holder(&items[pos].item, item, now)?;
        items.remove(pos);
        debug!("Item {} completed", item.id);
        Ok(())
    }

    async fn requeue(
        &self,
        _tx: &mut dyn Tx,
        item: &QueueItem,
        delay: Duration,
    ) -> crate::Result<()> {
        let mut items = self.items.write().await;
        let now = Instant::now();

        let stored = items
            .iter_mut()
            .find(|stored| stored.item.id == item.id)
            .ok_or_else(|| crate::QueueWorkerError::ItemNotFound(item.id.clone()))?;

        // Carry the caller's payload and error-count mutations back into the
        // store; a retried attempt must observe them.
        stored.item.data = item.data.clone();
        stored.item.error_count = item.error_count;
        stored.item.lease = None;
        stored.visible_at = now + delay;

        self.stats.write().await.requeue_delays.push(delay);
        debug!("Item {} requeued with delay {:?}", item.id, delay);
        Ok(())
    }

    async fn dequeue(&self, _tx: &mut dyn Tx, item: &QueueItem) -> crate::Result<()> {
        let mut items = self.items.write().await;
        let now = Instant::now();

        let pos = items
            .iter()
            .position(|stored| stored.item.id == item.id)
            .ok_or_else(|| crate::QueueWorkerError::ItemNotFound(item.id.clone()))?;

        check_holder(&items[pos].item, item, now)?;
        items.remove(pos);
        debug!("Item {} dequeued", item.id);
        Ok(())
    }

    async fn size(&self) -> usize {
        self.items.read().await.len()
    }
}

/// No-op transaction over the in-memory queue
///
/// Operations apply immediately under the queue's lock, so commit and
/// rollback have nothing left to do.
pub struct MemoryTx;

#[async_trait]
impl Tx for MemoryTx {
    async fn commit(&mut self) -> crate::Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Transaction manager handing out in-memory transactions
pub struct MemoryTxManager;

impl MemoryTxManager {
    /// Create a new in-memory transaction manager
    pub fn new() -> Self {
        Self
    }
}

impl Default for MemoryTxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxManager for MemoryTxManager {
    async fn start_tx(&self) -> crate::Result<Box<dyn Tx>> {
        Ok(Box::new(MemoryTx))
    }
}
