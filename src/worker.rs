//! Asynchronous job execution.
//!
//! Queued payloads are encoded images. Each worker owns a [`FaceService`]
//! (and with it its own detector instance) and runs every job to the
//! broadcast sink. A failed job is logged and dropped; there is no
//! redelivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};

use crate::dispatch::{Emitted, Sink};
use crate::error::DukerError;
use crate::service::FaceService;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Accepts encoded image payloads for asynchronous processing.
pub trait JobQueue: Send + Sync {
    /// Enqueue without blocking. A full queue rejects the payload.
    fn enqueue(&self, payload: Vec<u8>) -> std::result::Result<(), DukerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable handle that feeds the pool's bounded queue.
#[derive(Clone)]
pub struct JobSender {
    tx: SyncSender<Vec<u8>>,
}

impl JobQueue for JobSender {
    fn enqueue(&self, payload: Vec<u8>) -> std::result::Result<(), DukerError> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DukerError::QueueFull,
            TrySendError::Disconnected(_) => DukerError::QueueClosed,
        })
    }
}

pub struct WorkerPool {
    sender: Option<JobSender>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Build one service per worker with `make_service`, then start the workers.
    ///
    /// Every service is built before any thread starts, so a detector that
    /// fails to load aborts start-up without leaving workers behind.
    pub fn spawn<F>(cfg: WorkerConfig, mut make_service: F) -> Result<Self>
    where
        F: FnMut(usize) -> std::result::Result<FaceService, DukerError>,
    {
        if cfg.workers == 0 {
            return Err(anyhow!("worker pool needs at least one worker"));
        }
        if cfg.queue_capacity == 0 {
            return Err(anyhow!("worker queue capacity must be greater than zero"));
        }

        let services = (0..cfg.workers)
            .map(|id| make_service(id).with_context(|| format!("build service for worker {id}")))
            .collect::<Result<Vec<_>>>()?;

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(cfg.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(WorkerStats::default());

        let mut workers = Vec::with_capacity(cfg.workers);
        for (id, service) in services.into_iter().enumerate() {
            let rx = rx.clone();
            let stats = stats.clone();
            let handle = std::thread::Builder::new()
                .name(format!("duker-worker-{id}"))
                .spawn(move || run_worker(id, service, rx, stats))
                .context("spawn worker thread")?;
            workers.push(handle);
        }
        log::info!(
            "worker pool started: {} workers, queue capacity {}",
            cfg.workers,
            cfg.queue_capacity
        );

        Ok(Self {
            sender: Some(JobSender { tx }),
            workers,
            stats,
        })
    }

    pub fn sender(&self) -> Option<JobSender> {
        self.sender.clone()
    }

    /// Close the queue, let workers drain what is already queued, and join them.
    ///
    /// Jobs only drain once every `JobSender` clone has been dropped.
    pub fn shutdown(mut self) -> Result<()> {
        self.sender.take();
        for handle in self.workers.drain(..) {
            handle
                .join()
                .map_err(|_| anyhow!("worker thread panicked"))?;
        }
        log::info!(
            "worker pool stopped: {} completed, {} failed",
            self.stats.completed.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed)
        );
        Ok(())
    }
}

fn run_worker(
    id: usize,
    service: FaceService,
    rx: Arc<Mutex<Receiver<Vec<u8>>>>,
    stats: Arc<WorkerStats>,
) {
    loop {
        let job = {
            let Ok(guard) = rx.lock() else {
                log::error!("worker {}: queue lock poisoned", id);
                return;
            };
            guard.recv()
        };
        let Ok(payload) = job else {
            log::debug!("worker {}: queue closed", id);
            return;
        };

        log::info!("worker {}: received job ({} bytes)", id, payload.len());
        match service.handle(&payload, Sink::Broadcast) {
            Ok(dispatched) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                if let Emitted::Broadcast { topic, delivered } = dispatched.emitted {
                    log::debug!(
                        "worker {}: {} regions, broadcast to {} delivered={}",
                        id,
                        dispatched.region_count,
                        topic,
                        delivered
                    );
                }
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("worker {}: job dropped: {}", id, e);
            }
        }
    }
}
