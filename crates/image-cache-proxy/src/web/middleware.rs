//! HTTP middleware
//!
//! Request logging and the client-facing cache policy.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, Uri, header},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

/// Request logging middleware
///
/// Logs all incoming requests with timing information
pub async fn request_logging_middleware(
    method: Method,
    uri: Uri,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    // Generate request ID for tracing
    let request_id = uuid::Uuid::new_v4().to_string();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration = start.elapsed();

    if status >= 400 {
        warn!(
            method = %method,
            uri = %uri,
            status = status,
            request_id = %request_id,
            duration_ms = duration.as_millis(),
            "HTTP request completed with error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = status,
            request_id = %request_id,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    response
}

/// `Cache-Control` sent to clients on successful image responses. Kept much
/// shorter than the store's own lifetime so clients pick up re-fetched
/// images after the cache is wiped.
#[derive(Debug, Clone)]
pub struct ClientCachePolicy {
    value: HeaderValue,
}

impl ClientCachePolicy {
    pub fn new(max_age: u64) -> Self {
        Self {
            value: HeaderValue::from_str(&format!("public, max-age={max_age}"))
                .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=86400")),
        }
    }
}

/// Overwrites `Cache-Control` on every 2xx response.
pub async fn client_cache_policy_middleware(
    State(policy): State<ClientCachePolicy>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, policy.value.clone());
    }
    response
}
