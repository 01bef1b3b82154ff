//! Relational backend over any sqlx-supported driver.
//!
//! Two tables, `gauge(name, value)` and `counter(name, delta)`, keyed by
//! name. Every write looks up the existing row and then updates or
//! inserts. Transient driver failures are retried on the shared schedule.

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyConnection, AnyPool};
use tracing::{debug, info};

use super::{Storage, StorageError};
use crate::metrics::{Metric, MetricUpdate, Snapshot};
use crate::retry::{RetryPolicy, Transient};

const SCHEMA: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS gauge (
        name VARCHAR(255) PRIMARY KEY,
        value DOUBLE PRECISION NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS counter (
        name VARCHAR(255) PRIMARY KEY,
        delta BIGINT NOT NULL
    )",
];

/// SQLSTATE codes worth another attempt: unique violation from a racing
/// insert, and the class-08 connection exceptions.
const TRANSIENT_SQLSTATES: [&str; 8] = [
    "23505", "08000", "08003", "08006", "08001", "08004", "08007", "08P01",
];

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_sqlx(e),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
        _ => false,
    }
}

pub struct DbStorage {
    pool: AnyPool,
    retry: RetryPolicy,
}

impl DbStorage {
    /// Connect to `url` and make sure both tables exist.
    pub async fn connect(url: &str, retry: RetryPolicy) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();

        let pool = retry
            .run("db connect", || async move {
                let pool = AnyPoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(url)
                    .await?;
                Ok::<_, StorageError>(pool)
            })
            .await?;

        let storage = Self { pool, retry };
        storage.migrate().await?;
        info!("database storage ready");
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            self.retry
                .run("db schema", || async move {
                    sqlx::query(statement).execute(&self.pool).await?;
                    Ok::<_, StorageError>(())
                })
                .await?;
        }
        Ok(())
    }

    async fn apply_batch_once(&self, batch: &[Metric]) -> Result<Vec<Metric>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut applied = Vec::with_capacity(batch.len());

        for metric in batch {
            let update = match metric.to_update() {
                Ok(update) => update,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            };
            let stored = match update {
                MetricUpdate::Gauge { id, value } => {
                    upsert_gauge(&mut tx, id, value).await?;
                    Metric::gauge(id, value)
                }
                MetricUpdate::Counter { id, delta } => {
                    Metric::counter(id, add_counter(&mut tx, id, delta).await?)
                }
            };
            applied.push(stored);
        }

        tx.commit().await?;
        debug!(records = applied.len(), "batch committed");
        Ok(applied)
    }
}

// ─── Statements ──────────────────────────────────────────────────

async fn upsert_gauge(
    conn: &mut AnyConnection,
    name: &str,
    value: f64,
) -> Result<(), StorageError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gauge WHERE name = $1")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

    let statement = if existing > 0 {
        "UPDATE gauge SET value = $1 WHERE name = $2"
    } else {
        "INSERT INTO gauge (value, name) VALUES ($1, $2)"
    };
    sqlx::query(statement)
        .bind(value)
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn add_counter(
    conn: &mut AnyConnection,
    name: &str,
    delta: i64,
) -> Result<i64, StorageError> {
    let current: Option<i64> = sqlx::query_scalar("SELECT delta FROM counter WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    let (statement, total) = match current {
        Some(current) => (
            "UPDATE counter SET delta = $1 WHERE name = $2",
            current.wrapping_add(delta),
        ),
        None => ("INSERT INTO counter (delta, name) VALUES ($1, $2)", delta),
    };
    sqlx::query(statement)
        .bind(total)
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(total)
}

#[async_trait]
impl Storage for DbStorage {
    async fn write_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        self.retry
            .run("db write gauge", || async move {
                let mut conn = self.pool.acquire().await?;
                upsert_gauge(&mut conn, name, value).await
            })
            .await
    }

    async fn write_counter(&self, name: &str, delta: i64) -> Result<i64, StorageError> {
        self.retry
            .run("db write counter", || async move {
                let mut conn = self.pool.acquire().await?;
                add_counter(&mut conn, name, delta).await
            })
            .await
    }

    async fn read_gauge(&self, name: &str) -> Result<Option<f64>, StorageError> {
        self.retry
            .run("db read gauge", || async move {
                let value = sqlx::query_scalar("SELECT value FROM gauge WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(value)
            })
            .await
    }

    async fn read_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        self.retry
            .run("db read counter", || async move {
                let delta = sqlx::query_scalar("SELECT delta FROM counter WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(delta)
            })
            .await
    }

    /// Both tables are read in one transaction at the driver's default
    /// isolation level, which does not promise a cross-table snapshot.
    async fn snapshot(&self) -> Result<Snapshot, StorageError> {
        self.retry
            .run("db snapshot", || async move {
                let mut tx = self.pool.begin().await?;
                let gauges: Vec<(String, f64)> = sqlx::query_as("SELECT name, value FROM gauge")
                    .fetch_all(&mut *tx)
                    .await?;
                let counters: Vec<(String, i64)> =
                    sqlx::query_as("SELECT name, delta FROM counter")
                        .fetch_all(&mut *tx)
                        .await?;
                tx.commit().await?;
                Ok(Snapshot {
                    gauge: gauges.into_iter().collect(),
                    counter: counters.into_iter().collect(),
                })
            })
            .await
    }

    async fn apply_batch(&self, batch: &[Metric]) -> Result<Vec<Metric>, StorageError> {
        self.retry
            .run("db batch", || self.apply_batch_once(batch))
            .await
    }

    async fn restore(&self, _snapshot: Snapshot) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("restore"))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::Connection::ping(&mut *conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;

    async fn setup() -> DbStorage {
        DbStorage::connect("sqlite::memory:", RetryPolicy::immediate())
            .await
            .expect("in-memory database")
    }

    #[tokio::test]
    async fn writes_accumulate() {
        let db = setup().await;
        assert_eq!(db.write_counter("hits", 5).await.unwrap(), 5);
        assert_eq!(db.write_counter("hits", 7).await.unwrap(), 12);
        db.write_gauge("load", 0.25).await.unwrap();
        db.write_gauge("load", 0.75).await.unwrap();

        assert_eq!(db.read_counter("hits").await.unwrap(), Some(12));
        assert_eq!(db.read_gauge("load").await.unwrap(), Some(0.75));
        assert_eq!(db.read_gauge("hits").await.unwrap(), None);
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let db = setup().await;
        db.write_gauge("g", 1.0).await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.read_gauge("g").await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn batch_commits_with_running_totals() {
        let db = setup().await;
        let applied = db
            .apply_batch(&[
                Metric::counter("c", 2),
                Metric::gauge("g", 3.5),
                Metric::counter("c", 3),
            ])
            .await
            .unwrap();

        assert_eq!(applied[0], Metric::counter("c", 2));
        assert_eq!(applied[2], Metric::counter("c", 5));

        let snap = db.snapshot().await.unwrap();
        assert_eq!(snap.counter.get("c"), Some(&5));
        assert_eq!(snap.gauge.get("g"), Some(&3.5));
    }

    #[tokio::test]
    async fn invalid_record_rolls_back_whole_batch() {
        let db = setup().await;
        db.write_counter("c", 1).await.unwrap();

        let res = db
            .apply_batch(&[
                Metric::counter("c", 10),
                Metric::gauge("g", 1.0),
                Metric::query("bad", MetricKind::Unknown("histogram".into())),
            ])
            .await;

        assert!(matches!(res, Err(StorageError::Invalid(_))));
        assert_eq!(db.read_counter("c").await.unwrap(), Some(1));
        assert_eq!(db.read_gauge("g").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ping_and_restore() {
        let db = setup().await;
        db.ping().await.unwrap();
        assert!(matches!(
            db.restore(Snapshot::default()).await,
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn connection_failures_are_transient() {
        let io = sqlx::Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(StorageError::from(io).is_transient());
        assert!(StorageError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StorageError::from(sqlx::Error::RowNotFound).is_transient());
        assert!(!StorageError::Unsupported("restore").is_transient());
    }
}
