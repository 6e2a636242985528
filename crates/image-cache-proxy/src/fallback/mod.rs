//! Request entry point with an external-proxy fallback.
//!
//! The upstream resizing proxy is tried first. When it does not produce an
//! image (blocked origin, anti-hotlinking page, timeout) the original URL is
//! fetched through a configured external proxy service and the result is
//! cached under its own key.

use axum::{body::Body, response::Response};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::ImageCache;
use crate::config::Config;
use crate::config::defaults::{
    BROWSER_ACCEPT, BROWSER_USER_AGENT, FALLBACK_CACHE_CONTROL, FALLBACK_KEY_PREFIX,
};
use crate::errors::{AppResult, FallbackError, TransportError};
use crate::imaging::{is_image_content_type, sniff_content_type};
use crate::transport::Transport;
use crate::upstream::{CapturedResponse, ProxyPath, UpstreamProxy, inline_disposition};

/// Original image URL embedded in a request path, with the collapsed scheme
/// separator restored.
pub fn parse_target(path: &str) -> Option<String> {
    ProxyPath::parse(path).map(|p| p.target)
}

/// `<proxy>?url=<target>[&<key name>=<key value>]`. Existing query pairs on
/// the proxy URL are kept unless they use one of those names.
pub fn build_fallback_url(proxy_url: &Url, target: &str, api_key: Option<(&str, &str)>) -> Url {
    let mut url = proxy_url.clone();
    let key_name = api_key.map(|(name, _)| name);
    let kept: Vec<(String, String)> = proxy_url
        .query_pairs()
        .filter(|(name, _)| name != "url" && Some(&**name) != key_name)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.extend_pairs(kept);
        query.append_pair("url", target);
        if let Some((name, value)) = api_key {
            query.append_pair(name, value);
        }
    }
    url
}

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    /// `None` disables the fallback path entirely
    pub proxy_url: Option<Url>,
    pub api_key: Option<(String, String)>,
    /// Bound on the external proxy fetch
    pub timeout: Duration,
    /// Bound on a single upstream proxy invocation
    pub upstream_timeout: Duration,
}

impl FallbackSettings {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self {
            proxy_url: config.fallback.proxy_url()?,
            api_key: config.fallback.api_key(),
            timeout: config.fallback.timeout,
            upstream_timeout: config.web.request_timeout,
        })
    }
}

pub struct FallbackHandler {
    upstream: Arc<dyn UpstreamProxy>,
    cache: Arc<dyn ImageCache>,
    external: Arc<dyn Transport>,
    settings: FallbackSettings,
}

impl FallbackHandler {
    pub fn new(
        upstream: Arc<dyn UpstreamProxy>,
        cache: Arc<dyn ImageCache>,
        external: Arc<dyn Transport>,
        settings: FallbackSettings,
    ) -> Self {
        if let Some(url) = &settings.proxy_url {
            info!("Image fallback proxy enabled: {}", url.origin().ascii_serialization());
        }
        Self {
            upstream,
            cache,
            external,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.proxy_url.is_some()
    }

    /// Serves one request. Never fails; the worst case is the upstream's own
    /// error response.
    pub async fn handle(&self, uri: &Uri, headers: &HeaderMap) -> Response {
        let Some(proxy_url) = &self.settings.proxy_url else {
            return self.invoke_upstream(uri, headers).await.into_passthrough_response();
        };
        let Some(target) = parse_target(uri.path()) else {
            return self.invoke_upstream(uri, headers).await.into_passthrough_response();
        };

        let cache_key = format!("{FALLBACK_KEY_PREFIX}{}", uri.path());
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!("Serving {} from fallback cache", uri.path());
            return cached_response(cached);
        }

        let capture = self.invoke_upstream(uri, headers).await;
        if capture.is_valid_image() {
            return capture.into_response();
        }

        debug!(
            "Image proxy fallback: upstream failed or returned non-image (status: {}, content-type: {}), trying external proxy for {}",
            capture.status.as_u16(),
            capture.content_type().unwrap_or_default(),
            target
        );

        let api_key = self
            .settings
            .api_key
            .as_ref()
            .map(|(name, value)| (name.as_str(), value.as_str()));
        let external_url = build_fallback_url(proxy_url, &target, api_key);

        match self.fetch_external(&external_url).await {
            Ok((body, content_type)) => {
                self.cache.set(&cache_key, body.clone()).await;
                debug!(
                    "Image proxy fallback: fetched {} bytes from external proxy for {}",
                    body.len(),
                    target
                );
                external_response(body, content_type)
            }
            Err(e) => {
                error!("Image proxy fallback for {} failed: {}", target, e);
                capture.into_response()
            }
        }
    }

    async fn invoke_upstream(&self, uri: &Uri, headers: &HeaderMap) -> CapturedResponse {
        let timeout = self.settings.upstream_timeout;
        match tokio::time::timeout(timeout, self.upstream.handle(uri, headers)).await {
            Ok(capture) => capture,
            Err(_) => {
                warn!("Upstream proxy timed out after {:?} for {}", timeout, uri.path());
                CapturedResponse::error(StatusCode::GATEWAY_TIMEOUT, "upstream proxy timed out")
            }
        }
    }

    async fn fetch_external(&self, url: &Url) -> Result<(Bytes, HeaderValue), FallbackError> {
        let request = http::Request::get(url.as_str())
            .header(header::USER_AGENT, BROWSER_USER_AGENT)
            .header(header::ACCEPT, BROWSER_ACCEPT)
            .body(Bytes::new())
            .map_err(|_| FallbackError::InvalidTarget(url.to_string()))?;

        let timeout = self.settings.timeout;
        let response = tokio::time::timeout(timeout, self.external.send(&request))
            .await
            .map_err(|_| TransportError::Timeout {
                url: url.origin().ascii_serialization(),
                timeout_ms: timeout.as_millis(),
            })??;

        if !response.status().is_success() {
            return Err(FallbackError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(""));
        if !content_type.to_str().is_ok_and(is_image_content_type) {
            return Err(FallbackError::NotAnImage(
                String::from_utf8_lossy(content_type.as_bytes()).into_owned(),
            ));
        }

        Ok((response.into_body(), content_type))
    }
}

fn cached_response(body: Bytes) -> Response {
    let content_type = sniff_content_type(&body);
    let mut response = Response::new(Body::from(body.clone()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(FALLBACK_CACHE_CONTROL),
    );
    headers.insert("x-cache", HeaderValue::from_static("HIT-FALLBACK"));
    headers.insert(header::CONTENT_DISPOSITION, inline_disposition(content_type));
    response
}

fn external_response(body: Bytes, content_type: HeaderValue) -> Response {
    let length = body.len();
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(FALLBACK_CACHE_CONTROL),
    );
    response
}
