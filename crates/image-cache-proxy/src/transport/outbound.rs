//! Browser-like request headers and long-lived cache headers for origin fetches.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use std::sync::Arc;

use super::{Transport, clone_request};
use crate::config::defaults::{BROWSER_ACCEPT, BROWSER_ACCEPT_LANGUAGE, UPSTREAM_CACHE_CONTROL};
use crate::errors::TransportResult;

const SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");
const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");
const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");

/// Decorates a [`Transport`] so origin requests look like a browser loading
/// an `<img>`, and successful responses are cached as long-lived.
///
/// Only missing headers are filled in. The caller's request is left untouched.
pub struct OutboundHeaderTransport {
    inner: Arc<dyn Transport>,
    same_site_hosts: Vec<String>,
}

impl OutboundHeaderTransport {
    pub fn new(inner: Arc<dyn Transport>, same_site_hosts: Vec<String>) -> Self {
        Self {
            inner,
            same_site_hosts,
        }
    }

    fn fetch_site(&self, host: &str) -> &'static str {
        if self
            .same_site_hosts
            .iter()
            .any(|fragment| !fragment.is_empty() && host.contains(fragment.as_str()))
        {
            "same-site"
        } else {
            "cross-site"
        }
    }

    fn decorate(&self, request: &http::Request<Bytes>) -> http::Request<Bytes> {
        let mut outgoing = clone_request(request);
        let uri = request.uri();
        let host = uri.host().unwrap_or_default();
        let headers = outgoing.headers_mut();

        if let (Some(scheme), Some(authority)) = (uri.scheme_str(), origin_authority(uri)) {
            set_if_missing(headers, header::REFERER, &format!("{scheme}://{authority}/"));
        }
        set_if_missing(headers, header::ACCEPT, BROWSER_ACCEPT);
        set_if_missing(headers, header::ACCEPT_LANGUAGE, BROWSER_ACCEPT_LANGUAGE);
        set_if_missing(headers, SEC_FETCH_DEST, "image");
        set_if_missing(headers, SEC_FETCH_MODE, "no-cors");
        set_if_missing(headers, SEC_FETCH_SITE, self.fetch_site(host));

        outgoing
    }
}

/// `host[:port]` of the target, without any userinfo.
fn origin_authority(uri: &http::Uri) -> Option<&str> {
    let authority = uri.authority()?.as_str();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, rest)| rest);
    (!host_port.is_empty()).then_some(host_port)
}

fn set_if_missing(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if headers.contains_key(&name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[async_trait]
impl Transport for OutboundHeaderTransport {
    async fn send(&self, request: &http::Request<Bytes>) -> TransportResult<http::Response<Bytes>> {
        let outgoing = self.decorate(request);
        let mut response = self.inner.send(&outgoing).await?;

        if response.status().is_success() {
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(UPSTREAM_CACHE_CONTROL),
            );
        }
        Ok(response)
    }
}
