use async_trait::async_trait;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use super::proto::metrics_service_client::MetricsServiceClient;
use super::proto::{self, DataRequest, MetricBatch};
use super::{CONTENT_ENCODING_KEY, HASH_KEY, REAL_IP_KEY};
use crate::agent::transport::{SendError, Transport};
use crate::codec::{self, EncodeOptions};
use crate::metrics::Metric;
use crate::retry::RetryPolicy;

/// Single records go through `SendData` as envelopes, batches through
/// `UpdateBatch` as typed fields.
pub struct GrpcTransport {
    client: MetricsServiceClient<Channel>,
    encode: EncodeOptions,
    real_ip: MetadataValue<Ascii>,
    retry: RetryPolicy,
}

impl GrpcTransport {
    /// The channel connects lazily, so an unreachable server surfaces on
    /// the first send rather than here.
    pub fn new(address: &str, encode: EncodeOptions, real_ip: &str) -> Result<Self, SendError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let channel = Endpoint::from_shared(uri)
            .map_err(|e| SendError::Connect(e.to_string()))?
            .connect_lazy();
        let real_ip = real_ip
            .parse()
            .map_err(|_| SendError::Connect(format!("invalid origin address {real_ip:?}")))?;

        Ok(Self {
            client: MetricsServiceClient::new(channel),
            encode,
            real_ip,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        req.metadata_mut().insert(REAL_IP_KEY, self.real_ip.clone());
        req
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, metric: &Metric) -> Result<(), SendError> {
        let encoded = codec::encode(metric, &self.encode)?;
        let hash: Option<MetadataValue<Ascii>> = match &encoded.hash {
            Some(tag) => Some(
                tag.parse()
                    .map_err(|_| SendError::Connect("tag is not valid metadata".into()))?,
            ),
            None => None,
        };

        let (encoded, hash) = (&encoded, &hash);
        self.retry
            .run("SendData", || async move {
                let mut req = self.request(DataRequest {
                    message: encoded.body.clone(),
                });
                if encoded.compressed {
                    req.metadata_mut()
                        .insert(CONTENT_ENCODING_KEY, MetadataValue::from_static("gzip"));
                }
                if let Some(hash) = hash {
                    req.metadata_mut().insert(HASH_KEY, hash.clone());
                }
                self.client.clone().send_data(req).await?;
                Ok(())
            })
            .await
    }

    async fn send_batch(&self, batch: &[Metric]) -> Result<(), SendError> {
        let metrics: Vec<proto::Metric> = batch.iter().cloned().map(Into::into).collect();

        let metrics = &metrics;
        self.retry
            .run("UpdateBatch", || async move {
                let req = self.request(MetricBatch {
                    metrics: metrics.clone(),
                });
                self.client.clone().update_batch(req).await?;
                Ok(())
            })
            .await
    }
}
