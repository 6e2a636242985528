//! Content detection from leading bytes. Extensions and declared headers are
//! never trusted for cache decisions.

/// Wrapped HTTP response blobs start with the status line.
pub fn is_http_response_blob(data: &[u8]) -> bool {
    data.starts_with(b"HTTP/")
}

/// ISO-BMFF `ftyp` box with an AVIF (or generic HEIF image) brand.
pub fn is_avif(data: &[u8]) -> bool {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return false;
    }
    matches!(&data[8..12], b"avif" | b"avis" | b"mif1")
}

/// MIME type detected from the payload signature.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    if is_avif(data) {
        return "image/avif";
    }
    if looks_like_svg(data) {
        return "image/svg+xml";
    }
    if looks_like_html(data) {
        return "text/html; charset=utf-8";
    }
    if let Some(kind) = infer::get(data) {
        return kind.mime_type();
    }
    if !data.is_empty() && std::str::from_utf8(data).is_ok() {
        return "text/plain; charset=utf-8";
    }
    "application/octet-stream"
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}

/// Only JPEG and PNG are worth transcoding.
pub fn is_convertible(data: &[u8]) -> bool {
    matches!(sniff_content_type(data), "image/jpeg" | "image/png")
}

/// File extension used in `Content-Disposition` for a content type.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("avif") {
        ".avif"
    } else if content_type.contains("webp") {
        ".webp"
    } else if content_type.contains("png") {
        ".png"
    } else if content_type.contains("gif") {
        ".gif"
    } else if content_type.contains("jpeg") || content_type.contains("jpg") {
        ".jpg"
    } else {
        ".bin"
    }
}

fn leading_text(data: &[u8]) -> String {
    let head = &data[..data.len().min(512)];
    String::from_utf8_lossy(head).trim_start().to_ascii_lowercase()
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = leading_text(data);
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

fn looks_like_html(data: &[u8]) -> bool {
    let head = leading_text(data);
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const JPEG_HEAD: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    const PNG_HEAD: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[rstest]
    #[case(b"\0\0\0\x1cftypavif\0\0\0\0", true)]
    #[case(b"\0\0\0\x1cftypavis\0\0\0\0", true)]
    #[case(b"\0\0\0\x1cftypmif1\0\0\0\0", true)]
    #[case(b"\0\0\0\x1cftypheic\0\0\0\0", false)]
    #[case(b"\0\0\0\x1cftypav", false)]
    #[case(b"GIF89a-not-avif", false)]
    fn test_is_avif(#[case] data: &[u8], #[case] expected: bool) {
        assert_eq!(is_avif(data), expected);
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(sniff_content_type(JPEG_HEAD), "image/jpeg");
        assert_eq!(sniff_content_type(PNG_HEAD), "image/png");
        assert_eq!(sniff_content_type(b"GIF89a\x01\x00\x01\x00"), "image/gif");
        assert_eq!(
            sniff_content_type(b"<!DOCTYPE html><html></html>"),
            "text/html; charset=utf-8"
        );
        assert_eq!(sniff_content_type(b"<svg xmlns=\"\"/>"), "image/svg+xml");
        assert_eq!(sniff_content_type(&[0x00, 0xFF, 0x13]), "application/octet-stream");

        assert!(is_convertible(JPEG_HEAD));
        assert!(is_convertible(PNG_HEAD));
        assert!(!is_convertible(b"GIF89a\x01\x00\x01\x00"));
    }

    #[test]
    fn test_http_blob_detection() {
        assert!(is_http_response_blob(b"HTTP/1.1 200 OK\r\n\r\n"));
        assert!(!is_http_response_blob(JPEG_HEAD));
    }

    #[rstest]
    #[case("image/avif", ".avif")]
    #[case("image/webp", ".webp")]
    #[case("image/png", ".png")]
    #[case("image/gif", ".gif")]
    #[case("image/jpeg", ".jpg")]
    #[case("IMAGE/JPG", ".jpg")]
    #[case("text/html; charset=utf-8", ".bin")]
    fn test_extension_for_content_type(#[case] content_type: &str, #[case] ext: &str) {
        assert_eq!(extension_for_content_type(content_type), ext);
    }

    #[test]
    fn test_is_image_content_type() {
        assert!(is_image_content_type("image/jpeg"));
        assert!(is_image_content_type("Image/PNG"));
        assert!(!is_image_content_type("text/html"));
        assert!(!is_image_content_type("img"));
    }
}
