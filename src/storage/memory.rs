use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Storage, StorageError};
use crate::metrics::{Metric, MetricUpdate, Snapshot};

/// In-memory backend. One lock covers both maps, so snapshots are
/// consistent across gauges and counters.
#[derive(Debug, Default)]
pub struct MemStorage {
    inner: Mutex<Snapshot>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn write_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        self.inner.lock().gauge.insert(name.to_string(), value);
        Ok(())
    }

    async fn write_counter(&self, name: &str, delta: i64) -> Result<i64, StorageError> {
        let mut inner = self.inner.lock();
        let total = inner.counter.entry(name.to_string()).or_insert(0);
        *total = total.wrapping_add(delta);
        Ok(*total)
    }

    async fn read_gauge(&self, name: &str) -> Result<Option<f64>, StorageError> {
        Ok(self.inner.lock().gauge.get(name).copied())
    }

    async fn read_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.inner.lock().counter.get(name).copied())
    }

    async fn snapshot(&self) -> Result<Snapshot, StorageError> {
        Ok(self.inner.lock().clone())
    }

    async fn apply_batch(&self, batch: &[Metric]) -> Result<Vec<Metric>, StorageError> {
        // Validate everything first so a bad record leaves no partial writes
        let updates = batch
            .iter()
            .map(Metric::to_update)
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner = self.inner.lock();
        let applied = updates
            .into_iter()
            .map(|update| match update {
                MetricUpdate::Gauge { id, value } => {
                    inner.gauge.insert(id.to_string(), value);
                    Metric::gauge(id, value)
                }
                MetricUpdate::Counter { id, delta } => {
                    let total = inner.counter.entry(id.to_string()).or_insert(0);
                    *total = total.wrapping_add(delta);
                    Metric::counter(id, *total)
                }
            })
            .collect();
        Ok(applied)
    }

    async fn restore(&self, snapshot: Snapshot) -> Result<(), StorageError> {
        *self.inner.lock() = snapshot;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("ping"))
    }
}
