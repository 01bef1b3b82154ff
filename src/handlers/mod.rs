pub mod list;
pub mod ping;
pub mod update;
pub mod value;

use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use crate::codec::{gzip, CodecError, Incoming, HASH_HEADER};
use crate::metrics::MetricError;
use crate::storage::persist::PersistError;
use crate::storage::StorageError;
use crate::AppState;

// ─── Envelope helpers ────────────────────────────────────────────

/// `HashSHA256`, in the lowercase form `HeaderMap` stores.
pub(crate) const HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

/// Pair a request body with the envelope headers that came with it.
pub(crate) fn incoming<'a>(headers: &'a HeaderMap, body: Bytes) -> Incoming<'a> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    Incoming {
        body: body.to_vec(),
        compressed: gzip::mentions_gzip(encoding),
        hash: headers.get(HASH_HEADER).and_then(|v| v.to_str().ok()),
    }
}

/// Build a response that mirrors the caller's preferences: gzip when the
/// request accepts it, and a `HashSHA256` tag over the uncompressed body
/// when the server holds an HMAC key.
pub(crate) fn reply(
    state: &AppState,
    request: &HeaderMap,
    content_type: &'static str,
    body: Vec<u8>,
) -> Result<Response, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

    if let Some(key) = &state.decode.hash_key {
        let tag = key.sign(&body)?;
        let value = HeaderValue::from_str(&tag)
            .map_err(|e| AppError::Internal(format!("response tag: {e}")))?;
        headers.insert(HASH_HEADER_NAME, value);
    }

    let accepts_gzip = gzip::mentions_gzip(
        request
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );
    let body = if accepts_gzip {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        gzip::compress(&body).map_err(|e| AppError::Internal(format!("gzip: {e}")))?
    } else {
        body
    };

    Ok((StatusCode::OK, headers, body).into_response())
}

pub(crate) fn reply_json<T: serde::Serialize + ?Sized>(
    state: &AppState,
    request: &HeaderMap,
    value: &T,
) -> Result<Response, AppError> {
    let body = serde_json::to_vec(value).map_err(|e| AppError::Internal(e.to_string()))?;
    reply(state, request, "application/json", body)
}

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => {
                info!(error = %msg, "rejected request");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Forbidden(msg) => {
                info!(error = %msg, "forbidden origin");
                (StatusCode::FORBIDDEN, msg)
            }
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<CodecError> for AppError {
    fn from(e: CodecError) -> Self {
        if e.is_client_error() {
            Self::BadRequest(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<MetricError> for AppError {
    fn from(e: MetricError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        if e.is_client_error() {
            Self::BadRequest(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<PersistError> for AppError {
    fn from(e: PersistError) -> Self {
        Self::Internal(e.to_string())
    }
}
