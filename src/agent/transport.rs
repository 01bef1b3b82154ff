use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::codec::{self, CodecError, EncodeOptions, HASH_HEADER};
use crate::metrics::Metric;
use crate::middleware::trusted_subnet::REAL_IP_HEADER;
use crate::retry::{RetryPolicy, Transient};

// ─── Capability interface ────────────────────────────────────────

/// Delivers encoded records to the server. Implementations retry
/// transient failures themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, metric: &Metric) -> Result<(), SendError>;

    async fn send_batch(&self, batch: &[Metric]) -> Result<(), SendError>;
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("cannot reach server: {0}")]
    Connect(String),

    #[error("server answered {0}")]
    Status(u16),

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
}

impl Transient for SendError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Status(code) => *code >= 500,
            Self::Rpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::Unknown | tonic::Code::Internal
            ),
            Self::Encode(_) => false,
        }
    }
}

// ─── HTTP ────────────────────────────────────────────────────────

/// Posts envelopes to `/update/` and `/updates/`.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    encode: EncodeOptions,
    real_ip: String,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// `address` is `host:port`, with or without a scheme.
    pub fn new(address: &str, encode: EncodeOptions, real_ip: impl Into<String>) -> Self {
        let base_url = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self {
            client: Client::new(),
            base_url,
            encode,
            real_ip: real_ip.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post<T: serde::Serialize + ?Sized + Sync>(
        &self,
        path: &str,
        records: &T,
    ) -> Result<(), SendError> {
        let encoded = codec::encode(records, &self.encode)?;
        let url = format!("{}{path}", self.base_url);
        let (encoded, url_ref) = (&encoded, &url);

        self.retry
            .run(path, || async move {
                let mut req = self
                    .client
                    .post(url_ref)
                    .header(CONTENT_TYPE, "application/json")
                    .header(REAL_IP_HEADER, &self.real_ip)
                    .body(encoded.body.clone());
                if encoded.compressed {
                    req = req.header(CONTENT_ENCODING, "gzip");
                }
                if let Some(tag) = &encoded.hash {
                    req = req.header(HASH_HEADER, tag);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| SendError::Connect(e.to_string()))?;
                let status = resp.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(SendError::Status(status.as_u16()))
                }
            })
            .await?;

        debug!(url, "delivered");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, metric: &Metric) -> Result<(), SendError> {
        self.post("/update/", metric).await
    }

    async fn send_batch(&self, batch: &[Metric]) -> Result<(), SendError> {
        self.post("/updates/", batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_server_side_failures_are_retried() {
        assert!(SendError::Connect("refused".into()).is_transient());
        assert!(SendError::Status(503).is_transient());
        assert!(!SendError::Status(400).is_transient());
        assert!(SendError::Rpc(tonic::Status::unavailable("down")).is_transient());
        assert!(!SendError::Rpc(tonic::Status::permission_denied("no")).is_transient());
    }

    #[test]
    fn base_url_gets_a_scheme() {
        let t = HttpTransport::new("localhost:8080", EncodeOptions::default(), "127.0.0.1");
        assert_eq!(t.base_url, "http://localhost:8080");
        let t = HttpTransport::new("https://example.org/", EncodeOptions::default(), "127.0.0.1");
        assert_eq!(t.base_url, "https://example.org");
    }
}
