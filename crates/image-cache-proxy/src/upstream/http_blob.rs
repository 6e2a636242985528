//! Whole HTTP responses stored as cache entries.
//!
//! A blob is the status line, the headers and the body exactly as they would
//! appear on the wire (`HTTP/1.1 200 OK\r\n...\r\n\r\n<body>`). Blobs always
//! start with `HTTP/`, which keeps them out of the transcoding queue.

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use super::CapturedResponse;

const HEADER_END: &[u8] = b"\r\n\r\n";

pub fn encode(response: &CapturedResponse) -> Bytes {
    let mut out = BytesMut::with_capacity(response.body.len() + 256);
    out.put_slice(b"HTTP/1.1 ");
    out.put_slice(response.status.as_str().as_bytes());
    if let Some(reason) = response.status.canonical_reason() {
        out.put_u8(b' ');
        out.put_slice(reason.as_bytes());
    }
    out.put_slice(b"\r\n");

    for (name, value) in &response.headers {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    out.put_slice(&response.body);
    out.freeze()
}

/// Parses a blob written by [`encode`]. Returns `None` for anything else.
pub fn decode(blob: &Bytes) -> Option<CapturedResponse> {
    let header_end = blob
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)?;
    let head = std::str::from_utf8(&blob[..header_end]).ok()?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next()?;
    let mut parts = status_line.splitn(3, ' ');
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let status = StatusCode::from_bytes(parts.next()?.as_bytes()).ok()?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line.split_once(':')?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).ok()?;
        let value = HeaderValue::from_str(value.trim()).ok()?;
        headers.append(name, value);
    }

    let body = blob.slice(header_end + HEADER_END.len()..);
    Some(CapturedResponse::new(status, headers, body))
}
