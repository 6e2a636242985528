//! Outbound HTTP.
//!
//! [`Transport`] is the seam between the proxy and the network. The physical
//! implementation is [`ReqwestTransport`]; decorators such as
//! [`OutboundHeaderTransport`] wrap any other transport with the same contract.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::debug;

use crate::config::{UpstreamConfig, defaults::BROWSER_USER_AGENT};
use crate::errors::{AppError, AppResult, TransportError, TransportResult};

pub mod outbound;

pub use outbound::OutboundHeaderTransport;

/// Sends one fully buffered request and returns the fully buffered response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &http::Request<Bytes>) -> TransportResult<http::Response<Bytes>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: &http::Request<Bytes>) -> TransportResult<http::Response<Bytes>> {
        (**self).send(request).await
    }
}

/// Copies method, uri, version, headers and body. Extensions are not carried.
pub fn clone_request(request: &http::Request<Bytes>) -> http::Request<Bytes> {
    let mut copy = http::Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    copy
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_size: usize,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, max_body_size: usize) -> Self {
        Self {
            client,
            max_body_size,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::new(client, config.max_source_size))
    }

    /// Same client, different body limit.
    pub fn with_max_body_size(self, max_body_size: usize) -> Self {
        Self {
            max_body_size,
            ..self
        }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &http::Request<Bytes>) -> TransportResult<http::Response<Bytes>> {
        let url = request.uri().to_string();
        let mut builder = self
            .client
            .request(request.method().clone(), &url)
            .headers(request.headers().clone());
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await.map_err(|e| request_error(&url, e))?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        debug!("{} {} -> {}", request.method(), url, status);

        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_size as u64)
        {
            return Err(TransportError::BodyTooLarge {
                limit: self.max_body_size,
            });
        }

        let body = read_limited(response, self.max_body_size, &url).await?;

        let mut built = http::Response::builder()
            .status(status)
            .version(version)
            .body(body)?;
        *built.headers_mut() = headers;
        Ok(built)
    }
}

/// Streams the body, failing as soon as it grows past `limit`.
async fn read_limited(response: reqwest::Response, limit: usize, url: &str) -> TransportResult<Bytes> {
    let mut stream = response.bytes_stream();
    let mut collected = BytesMut::with_capacity(8192);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| request_error(url, e))?;
        if collected.len() + chunk.len() > limit {
            return Err(TransportError::BodyTooLarge { limit });
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(collected.freeze())
}

fn request_error(url: &str, source: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        source,
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every request and answers with a fixed response.
    pub struct RecordingTransport {
        pub status: http::StatusCode,
        pub headers: http::HeaderMap,
        pub body: Bytes,
        pub seen: Mutex<Vec<http::Request<Bytes>>>,
    }

    impl RecordingTransport {
        pub fn new(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
            let mut headers = http::HeaderMap::new();
            if !content_type.is_empty() {
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_str(content_type).unwrap(),
                );
            }
            Self {
                status: http::StatusCode::from_u16(status).unwrap(),
                headers,
                body: body.into(),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<http::Request<Bytes>> {
            self.seen.lock().unwrap().iter().map(clone_request).collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            request: &http::Request<Bytes>,
        ) -> TransportResult<http::Response<Bytes>> {
            self.seen.lock().unwrap().push(clone_request(request));
            let mut response = http::Response::new(self.body.clone());
            *response.status_mut() = self.status;
            *response.headers_mut() = self.headers.clone();
            Ok(response)
        }
    }
}
