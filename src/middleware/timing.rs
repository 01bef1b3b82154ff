use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Adds `X-Response-Time-Us` (handler wall time in microseconds) and logs
/// one line per request once the response is ready.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let us = start.elapsed().as_micros();

    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("x-response-time-us", val);
    }

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_us = us as u64,
        "request"
    );

    response
}
