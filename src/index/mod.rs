//! Secondary index builder
//!
//! Scans a collection in batches and materializes index entries. After every
//! batch the caller-supplied progress hook is invoked with a live transaction;
//! the worker uses it to renew its queue lease so multi-minute builds are not
//! poached by other workers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::metadata::Collection;
use crate::queue::{Tx, TxManager};

/// Default number of documents scanned per batch
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Hook invoked with a live transaction after each built batch
#[async_trait]
pub trait BuildProgress: Send + Sync {
    /// Report progress inside the batch's transaction
    async fn update(&self, tx: &mut dyn Tx) -> crate::Result<()>;
}

/// Builds the secondary indexes of one collection
pub struct SecondaryIndexer {
    coll: Arc<Collection>,
    batch_size: usize,
    throttle: Option<Duration>,
}

impl SecondaryIndexer {
    /// Create an indexer over the given collection
    pub fn new(coll: Arc<Collection>) -> Self {
        Self {
            coll,
            batch_size: DEFAULT_BATCH_SIZE,
            throttle: None,
        }
    }

    /// Override the scan batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause between batches to bound the build's load on the store
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Scan the collection and build entries for all of its indexes
    pub async fn build_collection(
        &self,
        tx_mgr: &dyn TxManager,
        progress: &dyn BuildProgress,
    ) -> crate::Result<()> {
        let docs = self.coll.documents().await;
        let indexes = self.coll.secondary_indexes().await;

        for (batch_no, batch) in docs.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            let mut tx = tx_mgr.start_tx().await?;

            for index in &indexes {
                let entries = batch
                    .iter()
                    .enumerate()
                    .filter_map(|(i, doc)| {
                        doc.get(&index.field)
                            .map(|value| (index_key(value), offset + i))
                    })
                    .collect();
                self.coll.write_index_entries(&index.name, entries).await;
            }

            progress.update(tx.as_mut()).await?;
            tx.commit().await?;
            debug!(
                "Indexed batch {} of collection {} ({} docs)",
                batch_no,
                self.coll.name(),
                batch.len()
            );

            if let Some(throttle) = self.throttle {
                tokio::time::sleep(throttle).await;
            }
        }

        Ok(())
    }
}

fn index_key(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SecondaryIndex;
    use crate::queue::memory::MemoryTxManager;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProgress(AtomicUsize);

    #[async_trait]
    impl BuildProgress for CountingProgress {
        async fn update(&self, _tx: &mut dyn Tx) -> crate::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_build_reports_progress_per_batch() {
        let coll = Arc::new(Collection::new(
            "users",
            vec![SecondaryIndex::new("by_country", "country")],
        ));
        let docs = (0..10)
            .map(|i| serde_json::json!({"country": format!("c{}", i % 3)}))
            .collect();
        coll.insert_documents(docs).await;

        let indexer = SecondaryIndexer::new(coll.clone()).with_batch_size(4);
        let progress = CountingProgress(AtomicUsize::new(0));
        indexer
            .build_collection(&MemoryTxManager::new(), &progress)
            .await
            .unwrap();

        // 10 documents in batches of 4 -> 3 batches
        assert_eq!(progress.0.load(Ordering::SeqCst), 3);
        assert_eq!(coll.index_key_count("by_country").await, 3);
    }

    #[tokio::test]
    async fn test_empty_collection_builds_nothing() {
        let coll = Arc::new(Collection::new(
            "empty",
            vec![SecondaryIndex::new("by_id", "id")],
        ));
        let indexer = SecondaryIndexer::new(coll.clone());
        let progress = CountingProgress(AtomicUsize::new(0));
        indexer
            .build_collection(&MemoryTxManager::new(), &progress)
            .await
            .unwrap();

        assert_eq!(progress.0.load(Ordering::SeqCst), 0);
        assert_eq!(coll.index_key_count("by_id").await, 0);
    }
}
