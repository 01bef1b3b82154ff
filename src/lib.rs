pub mod agent;
pub mod codec;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod retry;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod storage;

use std::sync::Arc;

use ip_network::IpNetwork;

use crate::codec::DecodeOptions;
use crate::storage::persist::PersistError;
use crate::storage::{SnapshotFile, Storage};

/// Shared server state, available to every HTTP handler via
/// `State<Arc<AppState>>` and to the gRPC service.
pub struct AppState {
    pub storage: Arc<dyn Storage>,

    /// Held across decode, apply and synchronous persist by every
    /// ingestion entry point on both transports.
    pub ingest: tokio::sync::Mutex<()>,

    /// Private key and HMAC key for inbound envelopes. The HMAC key also
    /// tags responses.
    pub decode: DecodeOptions,

    /// Origin check for HTTP requests. `None` disables it.
    pub trusted_subnet: Option<IpNetwork>,

    /// Set in flush-on-every-write mode.
    pub sync_file: Option<SnapshotFile>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            ingest: tokio::sync::Mutex::new(()),
            decode: DecodeOptions::default(),
            trusted_subnet: None,
            sync_file: None,
        }
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = decode;
        self
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<IpNetwork>) -> Self {
        self.trusted_subnet = subnet;
        self
    }

    pub fn with_sync_file(mut self, file: Option<SnapshotFile>) -> Self {
        self.sync_file = file;
        self
    }

    /// Write the snapshot file now if running in flush-on-every-write
    /// mode. Call with the ingest lock held.
    pub async fn persist_after_write(&self) -> Result<(), PersistError> {
        match &self.sync_file {
            Some(file) => file.flush(self.storage.as_ref()).await,
            None => Ok(()),
        }
    }
}
