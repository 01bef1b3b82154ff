//! gRPC server implementation

use ip_network::IpNetwork;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument};

use super::proto::metrics_service_server::{MetricsService, MetricsServiceServer};
use super::proto::{self, DataRequest, DataResponse, MetricBatch, MetricQuery};
use super::{CONTENT_ENCODING_KEY, HASH_KEY, REAL_IP_KEY};
use crate::codec::{self, gzip, CodecError, Incoming};
use crate::metrics::{Metric, MetricError};
use crate::middleware::trusted_subnet::{origin_allowed, parse_subnet};
use crate::shutdown::ShutdownSignal;
use crate::storage::persist::PersistError;
use crate::storage::StorageError;
use crate::AppState;

/// Subnet enforced when the server has none configured.
pub const DEFAULT_TRUSTED_SUBNET: &str = "127.0.0.1/32";

// ─── Origin interceptor ──────────────────────────────────────────

/// Every call must declare an `x-real-ip` inside the trusted subnet.
#[derive(Debug, Clone)]
pub struct OriginCheck {
    subnet: IpNetwork,
}

impl OriginCheck {
    pub fn new(subnet: IpNetwork) -> Self {
        Self { subnet }
    }

    fn for_state(state: &AppState) -> Result<Self, Status> {
        match state.trusted_subnet.clone() {
            Some(subnet) => Ok(Self::new(subnet)),
            None => parse_subnet(DEFAULT_TRUSTED_SUBNET)
                .map(Self::new)
                .map_err(Status::internal),
        }
    }
}

impl Interceptor for OriginCheck {
    fn call(&mut self, req: Request<()>) -> Result<Request<()>, Status> {
        let Some(declared) = req.metadata().get(REAL_IP_KEY) else {
            return Err(Status::permission_denied("missing x-real-ip metadata"));
        };
        let declared = declared.to_str().ok();
        if !origin_allowed(&self.subnet, declared) {
            return Err(Status::permission_denied(format!(
                "origin {} is not in the trusted subnet",
                declared.unwrap_or("<invalid>")
            )));
        }
        Ok(req)
    }
}

// ─── Service ─────────────────────────────────────────────────────

pub struct MetricsServiceImpl {
    state: Arc<AppState>,
}

impl MetricsServiceImpl {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsServiceImpl {
    /// One envelope-encoded record; decryption, integrity and gzip follow
    /// the call metadata exactly as on the HTTP side.
    #[instrument(skip_all)]
    async fn send_data(
        &self,
        request: Request<DataRequest>,
    ) -> Result<Response<DataResponse>, Status> {
        let (metadata, _, data) = request.into_parts();
        let encoding = metadata
            .get(CONTENT_ENCODING_KEY)
            .and_then(|v| v.to_str().ok());
        let incoming = Incoming {
            body: data.message,
            compressed: gzip::mentions_gzip(encoding),
            hash: metadata.get(HASH_KEY).and_then(|v| v.to_str().ok()),
        };

        let _guard = self.state.ingest.lock().await;
        let metric: Metric = codec::decode(incoming, &self.state.decode)?;
        let stored = self.state.storage.apply(&metric).await?;
        self.state.persist_after_write().await?;

        debug!(id = %stored.id, "gRPC: SendData applied");
        Ok(Response::new(DataResponse {}))
    }

    #[instrument(skip_all)]
    async fn update_metric(
        &self,
        request: Request<proto::Metric>,
    ) -> Result<Response<proto::Metric>, Status> {
        let metric = Metric::from(request.into_inner());

        let _guard = self.state.ingest.lock().await;
        let stored = self.state.storage.apply(&metric).await?;
        self.state.persist_after_write().await?;

        Ok(Response::new(stored.into()))
    }

    #[instrument(skip_all)]
    async fn update_batch(
        &self,
        request: Request<MetricBatch>,
    ) -> Result<Response<MetricBatch>, Status> {
        let batch: Vec<Metric> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(Metric::from)
            .collect();

        let _guard = self.state.ingest.lock().await;
        let applied = self.state.storage.apply_batch(&batch).await?;
        self.state.persist_after_write().await?;

        debug!(records = applied.len(), "gRPC: UpdateBatch applied");
        Ok(Response::new(MetricBatch {
            metrics: applied.into_iter().map(Into::into).collect(),
        }))
    }

    #[instrument(skip_all)]
    async fn get_metric(
        &self,
        request: Request<MetricQuery>,
    ) -> Result<Response<proto::Metric>, Status> {
        let query = Metric::from(request.into_inner());
        match self.state.storage.lookup(&query).await? {
            Some(found) => Ok(Response::new(found.into())),
            None => Err(Status::not_found(format!(
                "metric '{}' not found",
                query.id
            ))),
        }
    }
}

// ─── Error mapping ───────────────────────────────────────────────

impl From<CodecError> for Status {
    fn from(e: CodecError) -> Self {
        if e.is_client_error() {
            Status::invalid_argument(e.to_string())
        } else {
            Status::internal(e.to_string())
        }
    }
}

impl From<MetricError> for Status {
    fn from(e: MetricError) -> Self {
        Status::invalid_argument(e.to_string())
    }
}

impl From<StorageError> for Status {
    fn from(e: StorageError) -> Self {
        if e.is_client_error() {
            Status::invalid_argument(e.to_string())
        } else {
            Status::internal(e.to_string())
        }
    }
}

impl From<PersistError> for Status {
    fn from(e: PersistError) -> Self {
        Status::internal(e.to_string())
    }
}

// ─── Serving ─────────────────────────────────────────────────────

/// The service wrapped in its origin interceptor.
pub fn service(
    state: Arc<AppState>,
) -> Result<
    tonic::service::interceptor::InterceptedService<MetricsServiceServer<MetricsServiceImpl>, OriginCheck>,
    Status,
> {
    let check = OriginCheck::for_state(&state)?;
    Ok(MetricsServiceServer::with_interceptor(
        MetricsServiceImpl::new(state),
        check,
    ))
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve_on(
    state: Arc<AppState>,
    listener: TcpListener,
    mut shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    info!(address = %listener.local_addr()?, "gRPC server listening");

    Server::builder()
        .add_service(service(state)?)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.recv().await;
        })
        .await?;
    Ok(())
}
