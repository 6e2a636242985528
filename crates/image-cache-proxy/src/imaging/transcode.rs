//! AVIF transcoding with header-only size guards.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader, codecs::avif::AvifEncoder};
use std::io::Cursor;

use super::sniff;
use crate::config::ConversionConfig;
use crate::errors::{ConversionError, ConversionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub quality: u8,
    pub speed: u8,
    pub max_source_size: usize,
    pub max_width: u32,
    pub max_height: u32,
    pub max_pixels: u64,
}

impl From<&ConversionConfig> for TranscodeSettings {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            quality: config.quality,
            speed: config.speed,
            max_source_size: config.max_source_size,
            max_width: config.max_width,
            max_height: config.max_height,
            max_pixels: config.max_pixels,
        }
    }
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self::from(&ConversionConfig::default())
    }
}

impl TranscodeSettings {
    pub fn check_dimensions(&self, width: u32, height: u32) -> ConversionResult<()> {
        let pixels = u64::from(width) * u64::from(height);
        if width > self.max_width || height > self.max_height || pixels > self.max_pixels {
            return Err(ConversionError::DimensionsExceeded { width, height });
        }
        Ok(())
    }

    fn limits(&self) -> image::Limits {
        let mut limits = image::Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_pixels.saturating_mul(4));
        limits
    }
}

/// Width and height as declared in the image header. Pixel data is not read.
pub fn declared_dimensions(data: &[u8]) -> ConversionResult<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    Ok(reader.into_dimensions()?)
}

/// Converts a JPEG or PNG payload to AVIF.
///
/// Size, format and declared dimensions are all checked before anything is
/// decoded. Runs synchronously; see [`transcode_to_avif`] for the async entry.
pub fn encode_avif(data: &[u8], settings: &TranscodeSettings) -> ConversionResult<Vec<u8>> {
    if data.len() > settings.max_source_size {
        return Err(ConversionError::SourceTooLarge {
            size: data.len(),
            limit: settings.max_source_size,
        });
    }

    let format = match sniff::sniff_content_type(data) {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        other => return Err(ConversionError::UnsupportedFormat(other.to_string())),
    };

    let (width, height) = declared_dimensions(data)?;
    settings.check_dimensions(width, height)?;

    let mut reader = ImageReader::with_format(Cursor::new(data), format);
    reader.limits(settings.limits());
    let decoded = reader.decode()?;

    let image = if decoded.color().has_alpha() {
        DynamicImage::ImageRgba8(decoded.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(decoded.to_rgb8())
    };

    let mut encoded = Vec::new();
    let encoder =
        AvifEncoder::new_with_speed_quality(&mut encoded, settings.speed, settings.quality);
    image.write_with_encoder(encoder)?;

    Ok(encoded)
}

/// Runs [`encode_avif`] on the blocking pool. A panicking codec surfaces as
/// [`ConversionError::TaskFailed`] instead of unwinding into the caller.
pub async fn transcode_to_avif(
    data: Bytes,
    settings: TranscodeSettings,
) -> ConversionResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_avif(&data, &settings))
        .await
        .map_err(|e| ConversionError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::test_images;

    #[test]
    fn test_dimension_guard() {
        let settings = TranscodeSettings::default();
        assert!(settings.check_dimensions(8000, 2500).is_ok());
        assert!(settings.check_dimensions(8001, 10).is_err());
        assert!(settings.check_dimensions(10, 8001).is_err());
        assert!(settings.check_dimensions(5000, 5000).is_err());
    }

    #[test]
    fn test_oversized_declaration_is_never_decoded() {
        let png = test_images::png(9000, 100);
        assert_eq!(declared_dimensions(&png).unwrap(), (9000, 100));

        let err = encode_avif(&png, &TranscodeSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::DimensionsExceeded {
                width: 9000,
                height: 100
            }
        ));
    }

    #[test]
    fn test_rejects_unsupported_and_oversized_sources() {
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
        assert!(matches!(
            encode_avif(&gif, &TranscodeSettings::default()),
            Err(ConversionError::UnsupportedFormat(_))
        ));

        let settings = TranscodeSettings {
            max_source_size: 10,
            ..TranscodeSettings::default()
        };
        assert!(matches!(
            encode_avif(&test_images::jpeg(16, 16), &settings),
            Err(ConversionError::SourceTooLarge { .. })
        ));
    }

    #[test]
    fn test_corrupt_jpeg_degrades_to_error() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
        jpeg.extend(std::iter::repeat_n(0x5A, 6000));
        assert!(matches!(
            encode_avif(&jpeg, &TranscodeSettings::default()),
            Err(ConversionError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_transcodes_jpeg_to_avif() {
        let jpeg = test_images::jpeg(64, 48);
        let avif = transcode_to_avif(Bytes::from(jpeg), TranscodeSettings::default())
            .await
            .unwrap();
        assert!(sniff::is_avif(&avif));
    }

    #[tokio::test]
    async fn test_transcodes_png_with_alpha() {
        let png = test_images::png_rgba(40, 40);
        let avif = transcode_to_avif(Bytes::from(png), TranscodeSettings::default())
            .await
            .unwrap();
        assert!(sniff::is_avif(&avif));
    }
}
