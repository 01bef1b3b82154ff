//! gRPC transport: the same ingestion operations as the HTTP endpoints,
//! protected by a mandatory origin check.

pub mod client;
pub mod server;

pub mod proto {
    tonic::include_proto!("metrics.v1");
}

use crate::metrics::{Metric, MetricKind};

/// Metadata keys carried next to `SendData` payloads.
pub const CONTENT_ENCODING_KEY: &str = "content-encoding";
pub const HASH_KEY: &str = "hashsha256";
pub const REAL_IP_KEY: &str = "x-real-ip";

impl From<Metric> for proto::Metric {
    fn from(m: Metric) -> Self {
        Self {
            id: m.id,
            r#type: m.kind.into(),
            delta: m.delta,
            value: m.value,
        }
    }
}

impl From<proto::Metric> for Metric {
    fn from(m: proto::Metric) -> Self {
        Self {
            id: m.id,
            kind: MetricKind::from(m.r#type),
            delta: m.delta,
            value: m.value,
        }
    }
}

impl From<proto::MetricQuery> for Metric {
    fn from(q: proto::MetricQuery) -> Self {
        Metric::query(q.id, MetricKind::from(q.r#type))
    }
}
