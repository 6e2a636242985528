//! Resizing through the `image` crate. The output keeps the source format.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use std::io::Cursor;

use super::ResizeOptions;
use crate::errors::{ConversionError, ConversionResult};

/// A resized image and its content type.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub body: Bytes,
    pub content_type: &'static str,
}

/// Resizes `data` per `options`. Returns `None` when the image is already
/// within the requested size; images are never enlarged.
pub fn transform(data: &[u8], options: &ResizeOptions) -> ConversionResult<Option<Transformed>> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    let format = reader
        .format()
        .ok_or_else(|| ConversionError::UnsupportedFormat("unknown".to_string()))?;
    let output = output_format(format)?;

    let image = reader.decode()?;
    let (src_width, src_height) = (image.width(), image.height());
    let within_width = options.width == 0 || options.width >= src_width;
    let within_height = options.height == 0 || options.height >= src_height;
    if within_width && within_height {
        return Ok(None);
    }

    let resized = match (options.width, options.height) {
        (0, height) => image.resize(u32::MAX, height, FilterType::Lanczos3),
        (width, 0) => image.resize(width, u32::MAX, FilterType::Lanczos3),
        (width, height) if options.fit => image.resize(width, height, FilterType::Lanczos3),
        (width, height) => image.resize_to_fill(
            width.min(src_width),
            height.min(src_height),
            FilterType::Lanczos3,
        ),
    };

    let resized = match output {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };

    let mut encoded = Vec::new();
    resized.write_to(&mut Cursor::new(&mut encoded), output)?;
    Ok(Some(Transformed {
        body: Bytes::from(encoded),
        content_type: output.to_mime_type(),
    }))
}

fn output_format(format: ImageFormat) -> ConversionResult<ImageFormat> {
    match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP => Ok(format),
        other => Err(ConversionError::UnsupportedFormat(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{declared_dimensions, sniff_content_type, test_images};

    fn resize(data: &[u8], raw: &str) -> Option<Transformed> {
        transform(data, &ResizeOptions::parse(raw)).unwrap()
    }

    #[test]
    fn test_width_only_keeps_aspect() {
        let out = resize(&test_images::jpeg(400, 200), "100x").unwrap();
        assert_eq!(out.content_type, "image/jpeg");
        assert_eq!(sniff_content_type(&out.body), "image/jpeg");
        assert_eq!(declared_dimensions(&out.body).unwrap(), (100, 50));
    }

    #[test]
    fn test_height_only_keeps_aspect() {
        let out = resize(&test_images::png(400, 200), "x50").unwrap();
        assert_eq!(out.content_type, "image/png");
        assert_eq!(declared_dimensions(&out.body).unwrap(), (100, 50));
    }

    #[test]
    fn test_box_crops_unless_fit() {
        let source = test_images::png(400, 200);
        let filled = resize(&source, "100x100").unwrap();
        assert_eq!(declared_dimensions(&filled.body).unwrap(), (100, 100));

        let fitted = resize(&source, "100x100,fit").unwrap();
        assert_eq!(declared_dimensions(&fitted.body).unwrap(), (100, 50));
    }

    #[test]
    fn test_never_enlarges() {
        assert!(resize(&test_images::jpeg(64, 64), "700x").is_none());
        assert!(resize(&test_images::png_rgba(64, 64), "128x128").is_none());
    }

    #[test]
    fn test_undecodable_source_is_an_error() {
        let err = transform(b"<html>blocked</html>", &ResizeOptions::parse("100x")).unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedFormat(_)));
    }
}
