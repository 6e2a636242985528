//! The upstream resizing proxy the request handler sits in front of.

use async_trait::async_trait;
use http::{HeaderMap, Uri};

pub mod capture;
pub mod http_blob;
pub mod options;
pub mod proxy;
pub mod transform;

pub use capture::{CapturedResponse, inline_disposition};
pub use options::{ProxyPath, ResizeOptions};
pub use proxy::ResizeProxy;

/// Serves one `/<options>/<url>` request into a buffered response.
///
/// Implementations never fail outright: errors become a captured error
/// response so the caller can decide what to fall back to.
#[async_trait]
pub trait UpstreamProxy: Send + Sync {
    async fn handle(&self, uri: &Uri, headers: &HeaderMap) -> CapturedResponse;
}
