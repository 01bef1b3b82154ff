use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::metrics::Metric;
use crate::shutdown::ShutdownSignal;

// ─── Samplers ────────────────────────────────────────────────────

/// Produces a full set of gauges on every call.
pub trait Sampler: Send + 'static {
    fn sample(&mut self) -> Vec<Metric>;
}

/// Statistics of the agent's own process plus `RandomValue`.
pub struct RuntimeSampler {
    sys: System,
    pid: Option<Pid>,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!(error = e, "cannot resolve own pid, process stats disabled"))
            .ok();
        Self {
            sys: System::new(),
            pid,
        }
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RuntimeSampler {
    fn sample(&mut self) -> Vec<Metric> {
        let mut out = Vec::with_capacity(9);

        if let Some(pid) = self.pid {
            self.sys.refresh_process(pid);
            if let Some(process) = self.sys.process(pid) {
                let disk = process.disk_usage();
                out.extend([
                    Metric::gauge("ProcessResidentMemory", process.memory() as f64),
                    Metric::gauge("ProcessVirtualMemory", process.virtual_memory() as f64),
                    Metric::gauge("ProcessCpuUsage", f64::from(process.cpu_usage())),
                    Metric::gauge("ProcessRunTime", process.run_time() as f64),
                    Metric::gauge("ProcessDiskRead", disk.read_bytes as f64),
                    Metric::gauge("ProcessDiskWritten", disk.written_bytes as f64),
                    Metric::gauge("ProcessDiskReadTotal", disk.total_read_bytes as f64),
                    Metric::gauge("ProcessDiskWrittenTotal", disk.total_written_bytes as f64),
                ]);
            }
        }

        out.push(Metric::gauge("RandomValue", rand::random::<f64>()));
        out
    }
}

/// Host memory, swap, and per-CPU utilisation.
pub struct HostSampler {
    sys: System,
}

impl HostSampler {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for HostSampler {
    fn sample(&mut self) -> Vec<Metric> {
        self.sys.refresh_memory();
        self.sys.refresh_cpu();

        let mut out = vec![
            Metric::gauge("TotalMemory", self.sys.total_memory() as f64),
            Metric::gauge("FreeMemory", self.sys.free_memory() as f64),
            Metric::gauge("UsedMemory", self.sys.used_memory() as f64),
            Metric::gauge("TotalSwap", self.sys.total_swap() as f64),
            Metric::gauge("FreeSwap", self.sys.free_swap() as f64),
        ];
        out.extend(self.sys.cpus().iter().enumerate().map(|(i, cpu)| {
            Metric::gauge(format!("CPUutilization{}", i + 1), f64::from(cpu.cpu_usage()))
        }));
        out
    }
}

// ─── Shared snapshot slot ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Runtime,
    Host,
}

#[derive(Debug, Default)]
struct Slots {
    runtime: Vec<Metric>,
    host: Vec<Metric>,
}

/// Latest sample per source. Each publish replaces that source's
/// previous sample; the lock is held only for the swap or the copy.
#[derive(Debug, Default)]
pub struct SnapshotSlot {
    inner: Mutex<Slots>,
}

impl SnapshotSlot {
    pub fn publish(&self, source: Source, metrics: Vec<Metric>) {
        let mut slots = self.inner.lock();
        match source {
            Source::Runtime => slots.runtime = metrics,
            Source::Host => slots.host = metrics,
        }
    }

    /// Both sources, runtime first.
    pub fn current(&self) -> Vec<Metric> {
        let slots = self.inner.lock();
        slots.runtime.iter().chain(&slots.host).cloned().collect()
    }
}

// ─── Poll loop ───────────────────────────────────────────────────

/// Sample every `interval` into `slot` until shutdown. When `polls` is
/// given it is bumped once per sample.
pub fn spawn_poller<S: Sampler>(
    mut sampler: S,
    source: Source,
    slot: Arc<SnapshotSlot>,
    polls: Option<Arc<AtomicI64>>,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(interval));
        loop {
            tokio::select! {
                _ = ticks.next() => {
                    let metrics = sampler.sample();
                    debug!(?source, metrics = metrics.len(), "sampled");
                    slot.publish(source, metrics);
                    if let Some(polls) = &polls {
                        polls.fetch_add(1, Ordering::Relaxed);
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}
