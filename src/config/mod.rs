//! Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::worker::LEASE_TIME;

/// Configuration for the background worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of workers kept alive by the pool
    pub max_workers: usize,

    /// Base idle period between a worker's queue polls, in milliseconds
    pub worker_sleep_ms: u64,

    /// Period of the supervisor's heartbeat sweep, in milliseconds
    pub pool_sleep_ms: u64,

    /// Duration of the lease taken on a queue item, in milliseconds
    pub lease_time_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: num_cpus(),
            worker_sleep_ms: 500,
            pool_sleep_ms: 1000,
            lease_time_ms: LEASE_TIME.as_millis() as u64,
        }
    }
}

impl Config {
    /// Create a new configuration with a custom worker count
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    /// Base idle period between a worker's queue polls
    pub fn worker_sleep(&self) -> Duration {
        Duration::from_millis(self.worker_sleep_ms)
    }

    /// Period of the supervisor's heartbeat sweep
    pub fn pool_sleep(&self) -> Duration {
        Duration::from_millis(self.pool_sleep_ms)
    }

    /// Duration of the lease taken on a queue item
    pub fn lease_time(&self) -> Duration {
        Duration::from_millis(self.lease_time_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_workers == 0 {
            return Err(crate::QueueWorkerError::ConfigError(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.worker_sleep_ms == 0 || self.pool_sleep_ms == 0 {
            return Err(crate::QueueWorkerError::ConfigError(
                "Sleep times must be greater than 0".to_string(),
            ));
        }

        if self.lease_time_ms == 0 {
            return Err(crate::QueueWorkerError::ConfigError(
                "Lease time must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
