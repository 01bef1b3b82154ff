//! End-to-end: agent report cycle over HTTP into a live server.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;

use metrics_relay::agent::sampler::Source;
use metrics_relay::agent::transport::HttpTransport;
use metrics_relay::agent::{Agent, POLL_COUNT};
use metrics_relay::codec::{DecodeOptions, EncodeOptions, HashKey};
use metrics_relay::metrics::Metric;
use metrics_relay::middleware::trusted_subnet::parse_subnet;
use metrics_relay::retry::RetryPolicy;
use metrics_relay::server::create_router;
use metrics_relay::storage::{MemStorage, Storage};
use metrics_relay::AppState;

// ============================================================================
// Test Helpers
// ============================================================================

async fn start_server(state: AppState) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn agent_for(addr: &str, hash_key: Option<&str>, workers: usize) -> Agent {
    let transport = HttpTransport::new(
        addr,
        EncodeOptions {
            compress: true,
            encrypt_key: None,
            hash_key: hash_key.map(HashKey::new),
        },
        "127.0.0.1",
    )
    .with_retry(RetryPolicy::immediate());
    Agent::new(Arc::new(transport), workers)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn report_cycle_delivers_snapshot_and_poll_count() {
    let subnet = parse_subnet("127.0.0.1").unwrap();
    let (addr, state) = start_server(
        AppState::new(Arc::new(MemStorage::new()))
            .with_decode(DecodeOptions {
                decrypt_key: None,
                hash_key: Some(HashKey::new("k")),
            })
            .with_trusted_subnet(Some(subnet)),
    )
    .await;

    let agent = agent_for(&addr.to_string(), Some("k"), 3);
    agent.slot().publish(
        Source::Runtime,
        vec![Metric::gauge("RandomValue", 0.25), Metric::gauge("Alloc", 1024.0)],
    );
    agent
        .slot()
        .publish(Source::Host, vec![Metric::gauge("TotalMemory", 8.0e9)]);
    agent.polls().store(4, Ordering::SeqCst);

    agent.report().await;
    let polls = agent.polls();
    agent.shutdown().await;

    let storage = &state.storage;
    assert_eq!(storage.read_gauge("RandomValue").await.unwrap(), Some(0.25));
    assert_eq!(storage.read_gauge("Alloc").await.unwrap(), Some(1024.0));
    assert_eq!(storage.read_gauge("TotalMemory").await.unwrap(), Some(8.0e9));
    assert_eq!(storage.read_counter(POLL_COUNT).await.unwrap(), Some(4));
    assert_eq!(polls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn running_poll_total_is_sent_every_cycle() {
    let (addr, state) = start_server(AppState::new(Arc::new(MemStorage::new()))).await;
    let agent = agent_for(&addr.to_string(), None, 2);

    agent.polls().store(5, Ordering::SeqCst);
    agent.report().await;
    assert_eq!(state.storage.read_counter(POLL_COUNT).await.unwrap(), Some(5));

    // the agent never resets its total; the server adds each one
    agent.polls().fetch_add(5, Ordering::SeqCst);
    agent.report().await;
    agent.shutdown().await;

    assert_eq!(state.storage.read_counter(POLL_COUNT).await.unwrap(), Some(15));
}

#[tokio::test]
async fn failed_cycle_does_not_touch_the_total() {
    // grab a free port, then close it so connections are refused
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let agent = agent_for(&addr.to_string(), None, 2);
    agent
        .slot()
        .publish(Source::Runtime, vec![Metric::gauge("RandomValue", 0.5)]);
    agent.polls().store(3, Ordering::SeqCst);

    agent.report().await;
    let polls = agent.polls();
    agent.shutdown().await;

    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejected_by_server_hash_policy() {
    let (addr, state) = start_server(AppState::new(Arc::new(MemStorage::new())).with_decode(
        DecodeOptions {
            decrypt_key: None,
            hash_key: Some(HashKey::new("server-key")),
        },
    ))
    .await;

    let agent = agent_for(&addr.to_string(), None, 1);
    agent
        .slot()
        .publish(Source::Host, vec![Metric::gauge("FreeMemory", 1.0)]);
    agent.polls().store(1, Ordering::SeqCst);
    agent.report().await;
    agent.shutdown().await;

    assert!(state.storage.snapshot().await.unwrap().is_empty());
}
