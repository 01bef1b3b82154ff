use axum::{extract::State, http::HeaderMap, response::Response};
use std::sync::Arc;

use crate::AppState;

use super::{reply, AppError};

// ─── GET / ───────────────────────────────────────────────────────

pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let snapshot = state.storage.snapshot().await?;
    reply(
        &state,
        &headers,
        "text/html; charset=utf-8",
        snapshot.render_html().into_bytes(),
    )
}
