use axum::{extract::State, http::StatusCode};
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── GET /ping ───────────────────────────────────────────────────

/// 200 when the database answers. The memory backend has nothing to
/// reach, so it always reports 500.
pub async fn ping(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    state.storage.ping().await?;
    Ok(StatusCode::OK)
}
