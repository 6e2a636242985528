use axum::{
    Json,
    extract::State,
    http::{HeaderMap, Uri},
    response::Response,
};
use serde::Serialize;
use std::collections::BTreeMap;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub fallback_enabled: bool,
    /// Pending AVIF conversions per cache identifier
    pub pending_conversions: BTreeMap<String, usize>,
    pub total_pending: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pending_conversions: BTreeMap<String, usize> =
        state.registry.pending_counts().await.into_iter().collect();
    let total_pending = pending_conversions.values().sum();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
        fallback_enabled: state.handler.is_enabled(),
        pending_conversions,
        total_pending,
    })
}

/// `GET /<options>/<url>`
pub async fn proxy_image(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.handler.handle(&uri, &headers).await
}
