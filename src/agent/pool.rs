use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::transport::Transport;
use crate::metrics::Metric;

// ─── Outstanding-work counter ────────────────────────────────────

/// Jobs submitted but not yet finished, queued or in flight.
#[derive(Debug, Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            // Register before checking so a concurrent `done` is not missed
            let notified = self.idle.notified();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// ─── Public entry point ──────────────────────────────────────────

/// Fixed number of sender tasks draining a bounded job queue.
pub struct WorkerPool {
    jobs: Option<mpsc::Sender<Metric>>,
    outstanding: Arc<Outstanding>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Debug, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

impl WorkerPool {
    /// Spawns `size` workers over a queue holding at most `size` jobs.
    pub fn new(size: usize, transport: Arc<dyn Transport>) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(size);
        let rx = Arc::new(Mutex::new(rx));
        let outstanding = Arc::new(Outstanding::default());

        let workers = (0..size)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    rx.clone(),
                    transport.clone(),
                    outstanding.clone(),
                ))
            })
            .collect();

        Self {
            jobs: Some(tx),
            outstanding,
            workers,
        }
    }

    /// Queue one record, waiting while the queue is full.
    pub async fn submit(&self, metric: Metric) -> Result<(), PoolClosed> {
        let jobs = self.jobs.as_ref().ok_or(PoolClosed)?;
        self.outstanding.add();
        if jobs.send(metric).await.is_err() {
            self.outstanding.done();
            return Err(PoolClosed);
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Stop accepting jobs, wait for every outstanding one, then join
    /// the workers.
    pub async fn shutdown(mut self) {
        self.jobs.take();
        self.outstanding.wait_idle().await;
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        debug!("worker pool drained");
    }
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Metric>>>,
    transport: Arc<dyn Transport>,
    outstanding: Arc<Outstanding>,
) {
    loop {
        // Hold the receiver only while waiting for the next job
        let job = jobs.lock().await.recv().await;
        let Some(metric) = job else {
            break;
        };

        if let Err(e) = transport.send(&metric).await {
            warn!(worker = id, metric = %metric.id, error = %e, "dropping metric after retries");
        }
        outstanding.done();
    }
}
