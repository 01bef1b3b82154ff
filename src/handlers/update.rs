use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::codec;
use crate::metrics::{self, Metric};
use crate::AppState;

use super::{incoming, reply_json, AppError};

// ─── POST /update/:kind/:name/:value ─────────────────────────────

pub async fn update_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    let metric = metrics::parse_path_update(&kind, &name, &raw)?;

    let _guard = state.ingest.lock().await;
    let stored = state.storage.apply(&metric).await?;
    state.persist_after_write().await?;

    debug!(id = %stored.id, kind = %stored.kind, "path update applied");
    Ok(StatusCode::OK)
}

// ─── POST /update/ ───────────────────────────────────────────────

/// The body has already been decrypted by the middleware when a private
/// key is configured.
pub async fn update_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let stored = {
        let _guard = state.ingest.lock().await;
        let metric: Metric =
            codec::decode(incoming(&headers, body), &state.decode.without_decryption())?;
        let stored = state.storage.apply(&metric).await?;
        state.persist_after_write().await?;
        stored
    };

    reply_json(&state, &headers, &stored)
}

// ─── POST /updates/ ──────────────────────────────────────────────

pub async fn update_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let applied = {
        let _guard = state.ingest.lock().await;
        let batch: Vec<Metric> =
            codec::decode(incoming(&headers, body), &state.decode.without_decryption())?;
        let applied = state.storage.apply_batch(&batch).await?;
        state.persist_after_write().await?;
        applied
    };

    debug!(records = applied.len(), "batch applied");
    reply_json(&state, &headers, &applied)
}
