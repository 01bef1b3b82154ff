use anyhow::Context;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, warn};

use crate::codec::{crypto, DecodeOptions, HashKey};
use crate::config::ServerConfig;
use crate::handlers;
use crate::middleware::{decrypt, timing, trusted_subnet};
use crate::retry::RetryPolicy;
use crate::rpc;
use crate::shutdown::Shutdown;
use crate::storage::{persist, DbStorage, MemStorage, Storage};
use crate::AppState;

/// How long in-flight requests get to finish after a termination signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    // ── Ingestion bodies may arrive encrypted ───────────────────
    let ingest = Router::new()
        .route("/update/", post(handlers::update::update_json))
        .route("/updates/", post(handlers::update::update_batch))
        .route_layer(axum_mw::from_fn_with_state(
            state.clone(),
            decrypt::decrypt_body,
        ));

    Router::new()
        // ── Writes ──────────────────────────────────────────────
        .route(
            "/update/:kind/:name/:value",
            post(handlers::update::update_path),
        )
        .merge(ingest)
        // ── Reads ───────────────────────────────────────────────
        .route("/value/:kind/:name/", get(handlers::value::value_path))
        .route("/value/:kind/:name", get(handlers::value::value_path))
        .route("/value/", post(handlers::value::value_json))
        .route("/", get(handlers::list::list_metrics))
        .route("/ping", get(handlers::ping::ping))
        // ── Origin check runs before anything touches the body ──
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            trusted_subnet::check_origin,
        ))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CatchPanicLayer::new())
}

// ─── Startup ─────────────────────────────────────────────────────

/// Open the configured storage backend. A DSN selects the database.
pub async fn open_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn Storage>> {
    match config.database_dsn.as_deref().filter(|dsn| !dsn.is_empty()) {
        Some(dsn) => {
            let db = DbStorage::connect(dsn, RetryPolicy::default()).await?;
            Ok(Arc::new(db))
        }
        None => {
            info!("using in-memory storage");
            Ok(Arc::new(MemStorage::new()))
        }
    }
}

pub fn decode_options(config: &ServerConfig) -> anyhow::Result<DecodeOptions> {
    let decrypt_key = match &config.crypto_key {
        Some(path) => Some(Arc::new(crypto::load_private_key(path)?)),
        None => None,
    };
    Ok(DecodeOptions {
        decrypt_key,
        hash_key: config.hash_key.as_deref().map(HashKey::new),
    })
}

/// Sockets the server accepts on, bound before any state is built.
#[derive(Debug)]
pub struct Listeners {
    pub http: TcpListener,
    pub grpc: Option<TcpListener>,
}

impl Listeners {
    /// Bind the HTTP address and, when configured, the gRPC one.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let http = TcpListener::bind(&config.address)
            .await
            .with_context(|| format!("cannot bind HTTP address {}", config.address))?;
        let grpc = match &config.grpc_address {
            Some(addr) => Some(
                TcpListener::bind(addr.as_str())
                    .await
                    .with_context(|| format!("cannot bind gRPC address {addr}"))?,
            ),
            None => None,
        };
        Ok(Self { http, grpc })
    }
}

/// Bind both listeners, then serve until `shutdown` fires.
pub async fn run(config: ServerConfig, shutdown: Shutdown) -> anyhow::Result<()> {
    let listeners = Listeners::bind(&config).await?;
    serve(config, listeners, shutdown).await
}

/// Build state, restore the snapshot, start the flusher and accept on
/// `listeners` until `shutdown` fires.
pub async fn serve(
    config: ServerConfig,
    listeners: Listeners,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let storage = open_storage(&config).await?;
    let file = config.snapshot_file();
    let is_database = config.database_dsn.as_deref().is_some_and(|d| !d.is_empty());

    // ── 1. Restore before accepting anything ────────────────────
    if let (Some(file), true) = (&file, config.restore) {
        if is_database {
            info!("database backend active, skipping snapshot restore");
        } else if let Some(snapshot) = file.load().await? {
            info!(path = %file.path().display(), metrics = snapshot.len(), "restoring snapshot");
            storage.restore(snapshot).await?;
        }
    }

    // ── 2. Persistence mode ─────────────────────────────────────
    let mut sync_file = None;
    let mut flusher = None;
    if let Some(file) = file.filter(|_| !is_database) {
        if config.store_interval.is_zero() {
            sync_file = Some(file);
        } else {
            flusher = Some(persist::spawn_flusher(
                storage.clone(),
                file,
                config.store_interval,
                shutdown.subscribe(),
            ));
        }
    }

    let state = Arc::new(
        AppState::new(storage)
            .with_decode(decode_options(&config)?)
            .with_trusted_subnet(config.trusted_subnet.clone())
            .with_sync_file(sync_file),
    );

    // ── 3. gRPC listener ────────────────────────────────────────
    let grpc = listeners.grpc.map(|listener| {
        tokio::spawn(rpc::server::serve_on(
            state.clone(),
            listener,
            shutdown.subscribe(),
        ))
    });

    // ── 4. HTTP listener ────────────────────────────────────────
    info!(address = %listeners.http.local_addr()?, "HTTP server listening");

    let app = create_router(state);
    let mut stop = shutdown.subscribe();
    let server = axum::serve(listeners.http, app)
        .with_graceful_shutdown(async move { stop.recv().await })
        .into_future();

    let mut drained = shutdown.subscribe();
    tokio::select! {
        res = server => res?,
        _ = async {
            drained.recv().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => warn!("in-flight requests did not finish within {SHUTDOWN_GRACE:?}"),
    }

    if let Some(grpc) = grpc {
        match tokio::time::timeout(SHUTDOWN_GRACE, grpc).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "gRPC server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "gRPC server task failed"),
            Err(_) => warn!("gRPC server did not stop within {SHUTDOWN_GRACE:?}"),
        }
    }
    if let Some(flusher) = flusher {
        let _ = flusher.await;
    }

    info!("server stopped");
    Ok(())
}
