//! Request middleware.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, warn};

/// Logging middleware for requests.
///
/// Logs the path only; return redirects carry transaction details in the
/// query string.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    debug!(%method, %path, "Request started");

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        debug!(%method, %path, %status, ?duration, "Request completed");
    } else {
        warn!(%method, %path, %status, ?duration, "Request failed");
    }

    response
}
