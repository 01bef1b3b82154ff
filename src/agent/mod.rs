//! Collecting agent: two samplers publish into a shared slot, a report
//! loop fans the slot out to a worker pool and ships the poll count and
//! a full batch alongside.

pub mod pool;
pub mod sampler;
pub mod transport;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::codec::{crypto, EncodeOptions, HashKey};
use crate::config::AgentConfig;
use crate::metrics::Metric;
use crate::rpc::client::GrpcTransport;
use crate::shutdown::Shutdown;

use pool::WorkerPool;
use sampler::{spawn_poller, HostSampler, RuntimeSampler, SnapshotSlot, Source};
use transport::{HttpTransport, SendError, Transport};

pub const POLL_COUNT: &str = "PollCount";

pub struct Agent {
    slot: Arc<SnapshotSlot>,
    /// Runtime samples taken since start. Never reset.
    polls: Arc<AtomicI64>,
    transport: Arc<dyn Transport>,
    pool: WorkerPool,
}

impl Agent {
    pub fn new(transport: Arc<dyn Transport>, rate_limit: usize) -> Self {
        Self {
            slot: Arc::new(SnapshotSlot::default()),
            polls: Arc::new(AtomicI64::new(0)),
            pool: WorkerPool::new(rate_limit, transport.clone()),
            transport,
        }
    }

    pub fn slot(&self) -> Arc<SnapshotSlot> {
        self.slot.clone()
    }

    pub fn polls(&self) -> Arc<AtomicI64> {
        self.polls.clone()
    }

    /// One report cycle: every current record through the pool, then the
    /// poll count and the whole snapshot as one batch.
    pub async fn report(&self) {
        let snapshot = self.slot.current();
        debug!(metrics = snapshot.len(), "report cycle");

        for metric in snapshot.iter().cloned() {
            if self.pool.submit(metric).await.is_err() {
                warn!("worker pool closed, abandoning report cycle");
                return;
            }
        }

        if let Err(e) = self.report_poll_count().await {
            warn!(error = %e, "poll count not delivered");
        }

        if !snapshot.is_empty() {
            if let Err(e) = self.transport.send_batch(&snapshot).await {
                warn!(error = %e, records = snapshot.len(), "batch not delivered");
            }
        }
    }

    /// Send the running poll total. The server adds it to its counter
    /// each cycle whether or not earlier cycles got through.
    async fn report_poll_count(&self) -> Result<(), SendError> {
        let total = self.polls.load(Ordering::SeqCst);
        self.transport
            .send(&Metric::counter(POLL_COUNT, total))
            .await
    }

    /// Wait for every queued send to finish.
    pub async fn shutdown(self) {
        info!(outstanding = self.pool.outstanding(), "draining sender pool");
        self.pool.shutdown().await;
    }
}

// ─── Process entry point ─────────────────────────────────────────

pub fn encode_options(config: &AgentConfig) -> anyhow::Result<EncodeOptions> {
    let encrypt_key = match &config.crypto_key {
        Some(path) => Some(Arc::new(crypto::load_public_key(path)?)),
        None => None,
    };
    Ok(EncodeOptions {
        compress: true,
        encrypt_key,
        hash_key: config.hash_key.as_deref().map(HashKey::new),
    })
}

pub fn build_transport(config: &AgentConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let encode = encode_options(config)?;
    Ok(match &config.grpc_address {
        Some(addr) => {
            info!(address = %addr, "reporting over gRPC");
            Arc::new(GrpcTransport::new(addr, encode, &config.real_ip)?)
        }
        None => {
            info!(address = %config.address, "reporting over HTTP");
            Arc::new(HttpTransport::new(&config.address, encode, config.real_ip.clone()))
        }
    })
}

/// Run pollers and the report loop until `shutdown` fires, then drain.
pub async fn run(config: AgentConfig, shutdown: Shutdown) -> anyhow::Result<()> {
    let agent = Agent::new(build_transport(&config)?, config.rate_limit);

    let pollers = [
        spawn_poller(
            RuntimeSampler::new(),
            Source::Runtime,
            agent.slot(),
            Some(agent.polls()),
            config.poll_interval,
            shutdown.subscribe(),
        ),
        spawn_poller(
            HostSampler::new(),
            Source::Host,
            agent.slot(),
            None,
            config.poll_interval,
            shutdown.subscribe(),
        ),
    ];

    let mut stop = shutdown.subscribe();
    let mut reports = IntervalStream::new(tokio::time::interval(config.report_interval)).skip(1);
    info!(
        poll = ?config.poll_interval,
        report = ?config.report_interval,
        workers = config.rate_limit,
        "agent started"
    );

    loop {
        tokio::select! {
            _ = reports.next() => agent.report().await,
            _ = stop.recv() => break,
        }
    }

    info!("shutting down agent");
    agent.shutdown().await;
    for poller in pollers {
        let _ = poller.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    /// Rejects the first `PollCount` send, records the rest.
    #[derive(Default)]
    struct FirstPollFails {
        failed: AtomicBool,
        poll_counts: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Transport for FirstPollFails {
        async fn send(&self, metric: &Metric) -> Result<(), SendError> {
            if metric.id != POLL_COUNT {
                return Ok(());
            }
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(SendError::Status(400));
            }
            self.poll_counts.lock().push(metric.delta.unwrap_or_default());
            Ok(())
        }

        async fn send_batch(&self, _batch: &[Metric]) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn poll_total_is_resent_after_a_failed_cycle() {
        let transport = Arc::new(FirstPollFails::default());
        let agent = Agent::new(transport.clone(), 1);

        agent.polls().store(2, Ordering::SeqCst);
        agent.report().await;
        agent.polls().fetch_add(3, Ordering::SeqCst);
        agent.report().await;
        agent.report().await;
        agent.shutdown().await;

        assert_eq!(*transport.poll_counts.lock(), vec![5, 5]);
    }
}
