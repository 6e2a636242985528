use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::{CapturedResponse, ProxyPath, ResizeOptions, UpstreamProxy, http_blob, transform};
use crate::cache::ImageCache;
use crate::transport::Transport;

/// Fetches sources through a [`Transport`] and resizes them with the `image`
/// crate.
///
/// Source responses are cached as HTTP blobs under the target URL, and
/// resized ones under `<url>#<options>`.
pub struct ResizeProxy {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ImageCache>,
}

impl ResizeProxy {
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<dyn ImageCache>) -> Self {
        Self { transport, cache }
    }

    async fn cached(&self, key: &str) -> Option<CapturedResponse> {
        let blob = self.cache.get(key).await?;
        let response = http_blob::decode(&blob);
        if response.is_none() {
            debug!("Ignoring unreadable cache entry for {}", key);
        }
        response
    }

    async fn fetch_source(&self, url: &Url) -> CapturedResponse {
        if let Some(hit) = self.cached(url.as_str()).await {
            debug!("Source cache hit for {}", url);
            return hit;
        }

        let request = match http::Request::get(url.as_str()).body(Bytes::new()) {
            Ok(request) => request,
            Err(e) => {
                return CapturedResponse::error(StatusCode::BAD_REQUEST, e.to_string());
            }
        };

        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                return CapturedResponse::error(StatusCode::BAD_GATEWAY, e.to_string());
            }
        };

        let (parts, body) = response.into_parts();
        let captured = CapturedResponse::new(parts.status, parts.headers, body);
        if is_cacheable(&captured) {
            self.cache
                .set(url.as_str(), http_blob::encode(&captured))
                .await;
        }
        captured
    }
}

fn is_cacheable(response: &CapturedResponse) -> bool {
    if !response.status.is_success() {
        return false;
    }
    let cache_control = response
        .headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    !cache_control.contains("no-store") && !cache_control.contains("private")
}

#[async_trait]
impl UpstreamProxy for ResizeProxy {
    async fn handle(&self, uri: &Uri, _headers: &HeaderMap) -> CapturedResponse {
        let Some(path) = ProxyPath::parse(uri.path()) else {
            return CapturedResponse::error(StatusCode::BAD_REQUEST, "invalid request path");
        };
        let Some(url) = path.target_url(uri.query()) else {
            return CapturedResponse::error(
                StatusCode::BAD_REQUEST,
                format!("invalid target url: {}", path.target),
            );
        };
        let options = ResizeOptions::parse(&path.options);

        let transformed_key = format!("{url}#{options}");
        if !options.is_noop() {
            if let Some(hit) = self.cached(&transformed_key).await {
                debug!("Transformed cache hit for {}", transformed_key);
                return hit;
            }
        }

        let source = self.fetch_source(&url).await;
        if options.is_noop() || !source.status.is_success() {
            return source;
        }

        let data = source.body.clone();
        let result = tokio::task::spawn_blocking(move || transform::transform(&data, &options)).await;
        let transformed = match result {
            Ok(Ok(Some(transformed))) => transformed,
            Ok(Ok(None)) => return source,
            Ok(Err(e)) => {
                debug!("Serving {} untransformed: {}", url, e);
                return source;
            }
            Err(e) => {
                warn!("Resize task for {} failed: {}", url, e);
                return source;
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(transformed.content_type),
        );
        if let Some(cache_control) = source.headers.get(header::CACHE_CONTROL) {
            headers.insert(header::CACHE_CONTROL, cache_control.clone());
        }

        let response = CapturedResponse::new(StatusCode::OK, headers, transformed.body);
        if is_cacheable(&response) {
            self.cache
                .set(&transformed_key, http_blob::encode(&response))
                .await;
        }
        response
    }
}
