//! Queue Workers - background task worker pool for a multi-tenant database
//!
//! A pool of workers cooperatively dequeues tasks from a transactional queue,
//! holds short-lived leases while processing, renews the lease on long jobs,
//! and recycles workers whose heartbeat is lost.

/// Configuration for the worker pool
pub mod config;
/// Secondary index builder
pub mod index;
/// Tenant, project, database and collection metadata
pub mod metadata;
/// Queue client interface and in-memory implementation
pub mod queue;
/// Task payload definitions
pub mod task;
/// Worker loop and pool supervisor
pub mod worker;

pub use config::Config;
pub use metadata::TenantManager;
pub use queue::memory::{MemoryQueue, MemoryTxManager};
pub use queue::{QueueItem, TaskType};
pub use worker::pool::WorkerPool;
pub use worker::Event;

use thiserror::Error;

/// Result type for worker pool operations
pub type Result<T> = std::result::Result<T, QueueWorkerError>;

/// Error types for the worker pool subsystem
#[derive(Error, Debug)]
pub enum QueueWorkerError {
    /// Queue item with the specified ID was not found
    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    /// Another worker holds an unexpired lease on the item
    #[error("Lease already held for item: {0}")]
    LeaseHeld(String),

    /// The caller does not hold the lease it is trying to use
    #[error("Lease not held by caller for item: {0}")]
    LeaseNotHeld(String),

    /// Tenant lookup failed for the given namespace
    #[error("Tenant not found for namespace: {0}")]
    TenantNotFound(u32),

    /// Project lookup failed
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Database branch lookup failed
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// Collection lookup failed
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Task-level processing failure
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Worker pool lifecycle error
    #[error("Worker pool error: {0}")]
    PoolError(String),
}
