//! gRPC service tests against a real listener on an ephemeral port.

use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::Code;

use metrics_relay::agent::transport::{SendError, Transport};
use metrics_relay::codec::{DecodeOptions, EncodeOptions, HashKey};
use metrics_relay::metrics::{Metric, MetricKind};
use metrics_relay::middleware::trusted_subnet::parse_subnet;
use metrics_relay::retry::RetryPolicy;
use metrics_relay::rpc::client::GrpcTransport;
use metrics_relay::rpc::proto::metrics_service_client::MetricsServiceClient;
use metrics_relay::rpc::proto::{self, MetricQuery};
use metrics_relay::rpc::{server, REAL_IP_KEY};
use metrics_relay::shutdown::Shutdown;
use metrics_relay::storage::{MemStorage, Storage};
use metrics_relay::AppState;

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: Shutdown,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(state: AppState) -> Self {
        let state = Arc::new(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(server::serve_on(state.clone(), listener, rx));
        Self {
            addr,
            state,
            shutdown,
            handle,
        }
    }

    fn transport(&self, encode: EncodeOptions, real_ip: &str) -> GrpcTransport {
        GrpcTransport::new(&self.addr.to_string(), encode, real_ip)
            .unwrap()
            .with_retry(RetryPolicy::immediate())
    }

    async fn client(&self) -> MetricsServiceClient<tonic::transport::Channel> {
        MetricsServiceClient::connect(format!("http://{}", self.addr))
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

fn from_localhost<T>(message: T) -> tonic::Request<T> {
    let mut req = tonic::Request::new(message);
    req.metadata_mut()
        .insert(REAL_IP_KEY, "127.0.0.1".parse().unwrap());
    req
}

fn memory_state() -> AppState {
    AppState::new(Arc::new(MemStorage::new()))
}

// ============================================================================
// Envelope path (SendData) through the agent transport
// ============================================================================

#[tokio::test]
async fn send_data_applies_envelopes() {
    let srv = TestServer::start(memory_state()).await;
    let transport = srv.transport(
        EncodeOptions {
            compress: true,
            ..Default::default()
        },
        "127.0.0.1",
    );

    transport.send(&Metric::counter("requests", 5)).await.unwrap();
    transport.send(&Metric::counter("requests", 7)).await.unwrap();
    transport.send(&Metric::gauge("cpu", 0.9)).await.unwrap();

    let storage = &srv.state.storage;
    assert_eq!(storage.read_counter("requests").await.unwrap(), Some(12));
    assert_eq!(storage.read_gauge("cpu").await.unwrap(), Some(0.9));
    srv.stop().await;
}

#[tokio::test]
async fn send_data_with_full_envelope() {
    let key = Arc::new(RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap());
    let srv = TestServer::start(memory_state().with_decode(DecodeOptions {
        decrypt_key: Some(key.clone()),
        hash_key: Some(HashKey::new("secret")),
    }))
    .await;

    let transport = srv.transport(
        EncodeOptions {
            compress: true,
            encrypt_key: Some(Arc::new(key.to_public_key())),
            hash_key: Some(HashKey::new("secret")),
        },
        "127.0.0.1",
    );
    transport.send(&Metric::gauge("sealed", 3.5)).await.unwrap();
    assert_eq!(srv.state.storage.read_gauge("sealed").await.unwrap(), Some(3.5));

    // wrong HMAC key: rejected as a client error, nothing applied
    let wrong = srv.transport(
        EncodeOptions {
            compress: true,
            encrypt_key: Some(Arc::new(key.to_public_key())),
            hash_key: Some(HashKey::new("other")),
        },
        "127.0.0.1",
    );
    match wrong.send(&Metric::gauge("forged", 1.0)).await {
        Err(SendError::Rpc(status)) => assert_eq!(status.code(), Code::InvalidArgument),
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    assert_eq!(srv.state.storage.read_gauge("forged").await.unwrap(), None);
    srv.stop().await;
}

// ============================================================================
// Typed calls
// ============================================================================

#[tokio::test]
async fn batch_and_lookup() {
    let srv = TestServer::start(memory_state()).await;
    let transport = srv.transport(EncodeOptions::default(), "127.0.0.1");

    transport
        .send_batch(&[Metric::gauge("a", 1.5), Metric::counter("b", 3)])
        .await
        .unwrap();

    let mut client = srv.client().await;
    let found = client
        .get_metric(from_localhost(MetricQuery {
            id: "b".into(),
            r#type: MetricKind::COUNTER.into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(Metric::from(found), Metric::counter("b", 3));

    let missing = client
        .get_metric(from_localhost(MetricQuery {
            id: "nope".into(),
            r#type: MetricKind::GAUGE.into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::NotFound);
    srv.stop().await;
}

#[tokio::test]
async fn update_metric_returns_counter_total() {
    let srv = TestServer::start(memory_state()).await;
    let mut client = srv.client().await;

    for _ in 0..3 {
        client
            .update_metric(from_localhost(proto::Metric::from(Metric::counter("hits", 2))))
            .await
            .unwrap();
    }
    let stored = client
        .update_metric(from_localhost(proto::Metric::from(Metric::counter("hits", 4))))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stored.delta, Some(10));

    let bad = client
        .update_metric(from_localhost(proto::Metric {
            id: "g".into(),
            r#type: "gauge".into(),
            delta: Some(1),
            value: None,
        }))
        .await
        .unwrap_err();
    assert_eq!(bad.code(), Code::InvalidArgument);
    srv.stop().await;
}

#[tokio::test]
async fn non_finite_gauge_is_invalid() {
    let srv = TestServer::start(memory_state()).await;
    let mut client = srv.client().await;

    for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let err = client
            .update_metric(from_localhost(proto::Metric::from(Metric::gauge("g", value))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument, "{value}");
    }
    assert_eq!(srv.state.storage.read_gauge("g").await.unwrap(), None);
    srv.stop().await;
}

#[tokio::test]
async fn invalid_batch_is_rejected_whole() {
    let srv = TestServer::start(memory_state()).await;
    let mut client = srv.client().await;

    let batch = proto::MetricBatch {
        metrics: vec![
            Metric::gauge("a", 1.0).into(),
            proto::Metric {
                id: "b".into(),
                r#type: "histogram".into(),
                delta: None,
                value: Some(1.0),
            },
        ],
    };
    let err = client.update_batch(from_localhost(batch)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert!(srv.state.storage.snapshot().await.unwrap().is_empty());
    srv.stop().await;
}

// ============================================================================
// Origin check
// ============================================================================

#[tokio::test]
async fn calls_need_a_trusted_origin() {
    let srv = TestServer::start(memory_state()).await;

    // default subnet is loopback only
    let outsider = srv.transport(EncodeOptions::default(), "192.168.0.7");
    match outsider.send(&Metric::counter("c", 1)).await {
        Err(SendError::Rpc(status)) => assert_eq!(status.code(), Code::PermissionDenied),
        other => panic!("expected PermissionDenied, got {other:?}"),
    }

    let mut client = srv.client().await;
    let err = client
        .update_metric(tonic::Request::new(proto::Metric::from(Metric::counter("c", 1))))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);

    assert!(srv.state.storage.snapshot().await.unwrap().is_empty());
    srv.stop().await;
}

#[tokio::test]
async fn configured_subnet_replaces_default() {
    let subnet = parse_subnet("10.0.0.0/8").unwrap();
    let srv = TestServer::start(memory_state().with_trusted_subnet(Some(subnet))).await;

    let inside = srv.transport(EncodeOptions::default(), "10.20.30.40");
    inside.send(&Metric::counter("c", 1)).await.unwrap();

    let loopback = srv.transport(EncodeOptions::default(), "127.0.0.1");
    assert!(loopback.send(&Metric::counter("c", 1)).await.is_err());

    assert_eq!(srv.state.storage.read_counter("c").await.unwrap(), Some(1));
    srv.stop().await;
}
