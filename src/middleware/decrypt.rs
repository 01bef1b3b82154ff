use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::handlers::AppError;
use crate::AppState;

/// Same cap axum applies to plain bodies by default.
pub const MAX_SEALED_BYTES: usize = 2 * 1024 * 1024;

/// Replace an encrypted ingestion body with its plaintext. Passes the
/// request through untouched when no private key is configured.
pub async fn decrypt_body(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.decode.decrypt_key.is_none() {
        return Ok(next.run(req).await);
    }

    let (mut parts, body) = req.into_parts();
    let sealed = to_bytes(body, MAX_SEALED_BYTES).await.map_err(|e| {
        AppError::BadRequest(format!(
            "cannot read body (limit {MAX_SEALED_BYTES} bytes): {e}"
        ))
    })?;
    let plain = state.decode.decrypt(sealed.to_vec())?;

    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(plain))).await)
}
