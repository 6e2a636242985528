//! Buffered upstream responses.

use axum::{body::Body, response::Response};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};

use crate::imaging::{extension_for_content_type, is_image_content_type, sniff_content_type};

/// Status, headers and body collected from the upstream proxy before anything
/// is written to the client.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Plain-text error response.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::new(status, headers, Bytes::from(message.into()))
    }

    /// Declared `Content-Type`, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn sniffed_content_type(&self) -> &'static str {
        sniff_content_type(&self.body)
    }

    /// 2xx with an image body, going by either the declared or the sniffed type.
    pub fn is_valid_image(&self) -> bool {
        self.status.is_success()
            && (self.content_type().is_some_and(is_image_content_type)
                || is_image_content_type(self.sniffed_content_type()))
    }

    /// Writes the captured response out once, with `Content-Type` taken from
    /// the body, an exact `Content-Length` and an inline disposition.
    pub fn into_response(self) -> Response {
        let content_type = self.sniffed_content_type();
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 3);
        for (name, value) in &self.headers {
            if name == header::CONTENT_LENGTH
                || name == header::CONTENT_TYPE
                || name == header::CONTENT_DISPOSITION
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        headers.insert(
            header::CONTENT_DISPOSITION,
            inline_disposition(content_type),
        );

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }

    /// Writes the captured response out as the upstream produced it. Only
    /// `Content-Length` is recomputed.
    pub fn into_passthrough_response(self) -> Response {
        let mut headers = self.headers;
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

/// `inline; filename="image<ext>"` for a content type.
pub fn inline_disposition(content_type: &str) -> HeaderValue {
    let value = format!(
        "inline; filename=\"image{}\"",
        extension_for_content_type(content_type)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("inline"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::test_images;

    fn captured(status: u16, content_type: Option<&str>, body: Vec<u8>) -> CapturedResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        CapturedResponse::new(StatusCode::from_u16(status).unwrap(), headers, body.into())
    }

    #[test]
    fn test_validity() {
        let jpeg = test_images::jpeg(16, 16);
        assert!(captured(200, Some("image/jpeg"), jpeg.clone()).is_valid_image());
        // Sniffed type is enough when the header is wrong
        assert!(captured(200, Some("application/octet-stream"), jpeg.clone()).is_valid_image());
        assert!(captured(200, Some("image/png"), b"oops".to_vec()).is_valid_image());
        assert!(!captured(403, Some("image/jpeg"), jpeg).is_valid_image());
        assert!(!captured(200, Some("text/html"), b"<html></html>".to_vec()).is_valid_image());
    }

    #[test]
    fn test_flush_rewrites_entity_headers() {
        let png = test_images::png(16, 16);
        let mut capture = captured(200, Some("image/jpeg"), png.clone());
        capture
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("1"));
        capture
            .headers
            .insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
        capture
            .headers
            .insert(header::ETAG, HeaderValue::from_static("\"abc\""));

        let response = capture.into_response();
        let headers = response.headers();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], png.len().to_string().as_str());
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "inline; filename=\"image.png\""
        );
        assert_eq!(headers[header::ETAG], "\"abc\"");
    }

    #[test]
    fn test_passthrough_keeps_declared_type() {
        let mut capture = captured(403, Some("text/html"), b"<html>denied</html>".to_vec());
        capture
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
        let response = capture.into_passthrough_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "19");
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
    }

    #[test]
    fn test_error_response_keeps_status() {
        let response = CapturedResponse::error(StatusCode::BAD_GATEWAY, "upstream down").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"image.bin\""
        );
    }
}
