//! Snapshot file persistence for the memory backend.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use super::{Storage, StorageError};
use crate::metrics::Snapshot;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot file {path:?} is not a valid snapshot: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The on-disk `{"gauge": {...}, "counter": {...}}` document.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file does not exist yet.
    pub async fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| PersistError::Format {
                path: self.path.clone(),
                source,
            })
    }

    /// Write to a sibling temp file, then rename over the target so a crash
    /// never leaves a half-written snapshot.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| PersistError::Format {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Snapshot `storage` and save it.
    pub async fn flush(&self, storage: &dyn Storage) -> Result<(), PersistError> {
        let snapshot = storage.snapshot().await?;
        self.save(&snapshot).await?;
        debug!(
            path = %self.path.display(),
            metrics = snapshot.len(),
            "snapshot flushed"
        );
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Flush every `interval` until shutdown, then once more.
pub fn spawn_flusher(
    storage: Arc<dyn Storage>,
    file: SnapshotFile,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(interval)).skip(1);
        info!(path = %file.path().display(), ?interval, "snapshot flusher started");

        loop {
            tokio::select! {
                _ = ticks.next() => {
                    if let Err(e) = file.flush(storage.as_ref()).await {
                        error!(error = %e, "periodic snapshot flush failed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        match file.flush(storage.as_ref()).await {
            Ok(()) => info!(path = %file.path().display(), "final snapshot written"),
            Err(e) => error!(error = %e, "final snapshot flush failed"),
        }
    })
}
