//! Content sniffing and format conversion.

pub mod sniff;
pub mod transcode;

pub use sniff::{
    extension_for_content_type, is_avif, is_convertible, is_http_response_blob,
    is_image_content_type, sniff_content_type,
};
pub use transcode::{TranscodeSettings, declared_dimensions, encode_avif, transcode_to_avif};

#[cfg(test)]
pub(crate) mod test_images {
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x ^ y) & 0xFF) as u8,
            ])
        })
    }

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        gradient(width, height)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .unwrap();
        out
    }

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        gradient(width, height)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    pub fn png_rgba(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 128, (x + y) as u8]))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }
}
