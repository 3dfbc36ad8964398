//! Worker pool supervisor
//!
//! Owns N workers and keeps exactly N alive: heartbeats stamp liveness, a
//! periodic sweep recycles silent workers under fresh ids, and completion
//! events fan out to subscribers with a bounded per-sink send.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::metadata::TenantManager;
use crate::queue::{QueueClient, TxManager};
use crate::worker::{Event, Worker};

/// Per-subscriber bound on an event fan-out send
const NOTIFY_TIMEOUT: Duration = Duration::from_millis(5);

/// A live worker slot tracked by the supervisor
struct WorkerInfo {
    id: u64,
    stop: Arc<Notify>,
    last_heartbeat: Instant,
}

/// Pool state mutated under the pool mutex
struct PoolState {
    workers: Vec<WorkerInfo>,
    next_worker_id: u64,
    event_listeners: Vec<mpsc::Sender<Event>>,
}

/// Everything needed to start a worker, shared with the supervisor so it can
/// spawn replacements
#[derive(Clone)]
struct WorkerSpawner {
    queue: Arc<dyn QueueClient>,
    tx_mgr: Arc<dyn TxManager>,
    tenant_mgr: Arc<TenantManager>,
    worker_sleep: Duration,
    lease_time: Duration,
    event_tx: mpsc::Sender<Event>,
    heartbeat_tx: mpsc::Sender<u64>,
}

impl WorkerSpawner {
    fn spawn(&self, id: u64) -> WorkerInfo {
        let worker = Worker::new(
            id,
            self.queue.clone(),
            self.tx_mgr.clone(),
            self.tenant_mgr.clone(),
            self.worker_sleep,
            self.lease_time,
            self.event_tx.clone(),
            self.heartbeat_tx.clone(),
        );
        let stop = worker.stop_handle();
        tokio::spawn(worker.run());
        WorkerInfo {
            id,
            stop,
            last_heartbeat: Instant::now(),
        }
    }
}

/// A fixed-size pool of queue workers plus their supervisor
pub struct WorkerPool {
    max_workers: usize,
    worker_sleep: Duration,
    pool_sleep: Duration,
    spawner: WorkerSpawner,
    state: Arc<Mutex<PoolState>>,
    heartbeat_rx: Option<mpsc::Receiver<u64>>,
    event_rx: Option<mpsc::Receiver<Event>>,
    stop: Arc<Notify>,
}

impl WorkerPool {
    /// Create a pool over the given queue and metadata collaborators
    pub fn new(
        config: &Config,
        queue: Arc<dyn QueueClient>,
        tx_mgr: Arc<dyn TxManager>,
        tenant_mgr: Arc<TenantManager>,
    ) -> Self {
        // Ingress channels absorb bursts from every worker without dropping.
        let capacity = 3 * config.max_workers.max(1);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        Self {
            max_workers: config.max_workers,
            worker_sleep: config.worker_sleep(),
            pool_sleep: config.pool_sleep(),
            spawner: WorkerSpawner {
                queue,
                tx_mgr,
                tenant_mgr,
                worker_sleep: config.worker_sleep(),
                lease_time: config.lease_time(),
                event_tx,
                heartbeat_tx,
            },
            state: Arc::new(Mutex::new(PoolState {
                workers: Vec::new(),
                next_worker_id: 0,
                event_listeners: Vec::new(),
            })),
            heartbeat_rx: Some(heartbeat_rx),
            event_rx: Some(event_rx),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Spawn the workers and the supervisor; returns immediately
    pub async fn start(&mut self) -> crate::Result<()> {
        let (Some(heartbeat_rx), Some(event_rx)) =
            (self.heartbeat_rx.take(), self.event_rx.take())
        else {
            return Err(crate::QueueWorkerError::PoolError(
                "pool already started".to_string(),
            ));
        };

        info!("Starting worker pool with {} workers", self.max_workers);

        {
            let mut state = self.state.lock().await;
            for id in 0..self.max_workers as u64 {
                state.next_worker_id = id;
                let info = self.spawner.spawn(id);
                state.workers.push(info);
            }
        }

        let supervisor = Supervisor {
            state: self.state.clone(),
            spawner: self.spawner.clone(),
            worker_sleep: self.worker_sleep,
            pool_sleep: self.pool_sleep,
            stop: self.stop.clone(),
        };
        tokio::spawn(supervisor.run(heartbeat_rx, event_rx));
        Ok(())
    }

    /// Signal every worker and the supervisor to stop; does not wait for
    /// in-flight handlers to return
    pub async fn stop(&self) {
        let state = self.state.lock().await;
        for info in &state.workers {
            info.stop.notify_one();
        }
        self.stop.notify_one();
    }

    /// Register a sink for completion events
    pub async fn subscribe(&self, listener: mpsc::Sender<Event>) {
        self.state.lock().await.event_listeners.push(listener);
    }

    /// Number of worker slots currently tracked
    pub async fn worker_count(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// Ids of the currently tracked workers
    pub async fn worker_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .await
            .workers
            .iter()
            .map(|info| info.id)
            .collect()
    }
}

/// Single task multiplexing heartbeats, events and the recycle sweep
struct Supervisor {
    state: Arc<Mutex<PoolState>>,
    spawner: WorkerSpawner,
    worker_sleep: Duration,
    pool_sleep: Duration,
    stop: Arc<Notify>,
}

impl Supervisor {
    async fn run(self, mut heartbeat_rx: mpsc::Receiver<u64>, mut event_rx: mpsc::Receiver<Event>) {
        let mut ticker = interval_at(Instant::now() + self.pool_sleep, self.pool_sleep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    info!("Shutting down worker pool");
                    return;
                }
                Some(worker_id) = heartbeat_rx.recv() => {
                    self.record_heartbeat(worker_id).await;
                }
                Some(event) = event_rx.recv() => {
                    self.notify(event).await;
                }
                _ = ticker.tick() => {
                    self.check_heartbeats().await;
                }
            }
        }
    }

    async fn record_heartbeat(&self, worker_id: u64) {
        let mut state = self.state.lock().await;
        match state.workers.iter_mut().find(|info| info.id == worker_id) {
            Some(info) => info.last_heartbeat = Instant::now(),
            // Races with recycling: a doomed worker's late heartbeat is
            // dropped rather than misattributed.
            None => warn!("Received heartbeat from missing worker id {}", worker_id),
        }
    }

    /// Fan an event out to every subscriber, best-effort per sink
    async fn notify(&self, event: Event) {
        let listeners = self.state.lock().await.event_listeners.clone();
        for listener in listeners {
            let _ = timeout(NOTIFY_TIMEOUT, listener.send(event.clone())).await;
        }
    }

    /// Replace every worker that has been silent past the liveness threshold
    async fn check_heartbeats(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let threshold = 5 * self.worker_sleep;

        for i in 0..state.workers.len() {
            if now.duration_since(state.workers[i].last_heartbeat) > threshold {
                state.workers[i].stop.notify_one();
                state.next_worker_id += 1;
                let id = state.next_worker_id;
                error!(
                    "No response from worker {}, adding worker {}",
                    state.workers[i].id, id
                );
                state.workers[i] = self.spawner.spawn(id);
            }
        }
    }
}
