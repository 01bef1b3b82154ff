pub mod database;
pub mod memory;
pub mod persist;

pub use database::DbStorage;
pub use memory::MemStorage;
pub use persist::SnapshotFile;

use async_trait::async_trait;
use thiserror::Error;

use crate::metrics::{Metric, MetricError, MetricUpdate, Snapshot};

// ─── Capability interface ────────────────────────────────────────

/// Accumulator for gauges (last write wins) and counters (sum of deltas).
///
/// Backends do not order concurrent writers themselves; the ingestion
/// layer serialises every write path through one lock.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn write_gauge(&self, name: &str, value: f64) -> Result<(), StorageError>;

    /// Add `delta` and return the new accumulated total.
    async fn write_counter(&self, name: &str, delta: i64) -> Result<i64, StorageError>;

    async fn read_gauge(&self, name: &str) -> Result<Option<f64>, StorageError>;

    async fn read_counter(&self, name: &str) -> Result<Option<i64>, StorageError>;

    async fn snapshot(&self) -> Result<Snapshot, StorageError>;

    /// Apply every record or none. Returns the records as stored, with
    /// counters carrying their post-write totals.
    async fn apply_batch(&self, batch: &[Metric]) -> Result<Vec<Metric>, StorageError>;

    /// Replace the whole state with `snapshot`.
    async fn restore(&self, snapshot: Snapshot) -> Result<(), StorageError>;

    /// Round trip to the backend, if there is one.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Apply one validated record, returning it as stored.
    async fn apply(&self, metric: &Metric) -> Result<Metric, StorageError> {
        match metric.to_update()? {
            MetricUpdate::Gauge { id, value } => {
                self.write_gauge(id, value).await?;
                Ok(Metric::gauge(id, value))
            }
            MetricUpdate::Counter { id, delta } => {
                let total = self.write_counter(id, delta).await?;
                Ok(Metric::counter(id, total))
            }
        }
    }

    /// Fill in the current value of a value-less record.
    async fn lookup(&self, query: &Metric) -> Result<Option<Metric>, StorageError> {
        use crate::metrics::MetricKind;

        if query.id.is_empty() {
            return Err(MetricError::EmptyId.into());
        }
        Ok(match &query.kind {
            MetricKind::Gauge => self
                .read_gauge(&query.id)
                .await?
                .map(|v| Metric::gauge(query.id.clone(), v)),
            MetricKind::Counter => self
                .read_counter(&query.id)
                .await?
                .map(|v| Metric::counter(query.id.clone(), v)),
            MetricKind::Unknown(kind) => {
                return Err(MetricError::UnknownKind(kind.clone()).into())
            }
        })
    }
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Invalid(#[from] MetricError),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl StorageError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}
