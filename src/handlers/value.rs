use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use std::sync::Arc;

use crate::codec;
use crate::metrics::{Metric, MetricError, MetricKind};
use crate::AppState;

use super::{incoming, reply, reply_json, AppError};

// ─── GET /value/:kind/:name/ ─────────────────────────────────────

/// The bare stored value as a JSON number.
pub async fn value_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let raw = match MetricKind::from(kind) {
        MetricKind::Gauge => state.storage.read_gauge(&name).await?.map(|v| v.to_string()),
        MetricKind::Counter => state
            .storage
            .read_counter(&name)
            .await?
            .map(|v| v.to_string()),
        MetricKind::Unknown(kind) => return Err(MetricError::UnknownKind(kind).into()),
    };

    match raw {
        Some(raw) => reply(&state, &headers, "application/json", raw.into_bytes()),
        None => Err(AppError::NotFound(format!("metric '{name}' not found"))),
    }
}

// ─── POST /value/ ────────────────────────────────────────────────

pub async fn value_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let query: Metric = codec::decode(incoming(&headers, body), &state.decode.without_decryption())?;

    match state.storage.lookup(&query).await? {
        Some(found) => reply_json(&state, &headers, &found),
        None => Err(AppError::NotFound(format!("metric '{}' not found", query.id))),
    }
}
