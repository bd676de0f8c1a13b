//! Image normalization
//!
//! Turns uploaded bytes into a `CanonicalImage`: decoded, rotated upright
//! according to its EXIF orientation, and converted to 8-bit RGB. Grayscale,
//! palette and alpha inputs all come out as plain RGB so the predictor only
//! ever sees one pixel layout.

use crate::error::PipelineError;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;

/// Encodings accepted for upload
pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Tiff,
];

/// Decoded, upright, 3-channel image without metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalImage {
    pixels: RgbImage,
}

impl CanonicalImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Always 3 (RGB)
    pub fn channel_count(&self) -> u8 {
        3
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Re-encode the canonical pixels as PNG
    pub fn encode_png(&self) -> image::ImageResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.pixels.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

impl From<RgbImage> for CanonicalImage {
    fn from(pixels: RgbImage) -> Self {
        Self { pixels }
    }
}

/// Decode raw upload bytes into a canonical image
pub fn normalize(raw: &[u8]) -> Result<CanonicalImage, PipelineError> {
    if raw.is_empty() {
        return Err(PipelineError::Decode("image data is empty".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;

    let format = reader
        .format()
        .ok_or_else(|| PipelineError::Decode("unrecognized image format".to_string()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(PipelineError::Decode(format!(
            "unsupported image format {:?} (expected JPEG, PNG, WEBP or TIFF)",
            format
        )));
    }

    let mut decoder = reader
        .into_decoder()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;

    // Unreadable orientation metadata is not worth rejecting the image over
    let orientation = decoder
        .orientation()
        .unwrap_or(image::metadata::Orientation::NoTransforms);

    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|e| PipelineError::Decode(e.to_string()))?;
    image.apply_orientation(orientation);

    Ok(CanonicalImage::from(image.into_rgb8()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};

    pub(crate) fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    /// Insert an EXIF APP1 segment carrying only an orientation tag
    /// right after the JPEG SOI marker.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes()); // IFD0 offset
        tiff.extend_from_slice(&1u16.to_le_bytes()); // entry count
        tiff.extend_from_slice(&0x0112u16.to_le_bytes()); // Orientation tag
        tiff.extend_from_slice(&3u16.to_le_bytes()); // SHORT
        tiff.extend_from_slice(&1u32.to_le_bytes()); // count
        tiff.extend_from_slice(&orientation.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]); // value padding
        tiff.extend_from_slice(&0u32.to_le_bytes()); // no next IFD

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);

        let segment_len = (payload.len() + 2) as u16;
        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend_from_slice(&segment_len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_rgb_png_passes_through() {
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        let bytes = encode(&DynamicImage::ImageRgb8(img.clone()), ImageFormat::Png);

        let canonical = normalize(&bytes).unwrap();
        assert_eq!((canonical.width(), canonical.height()), (4, 2));
        assert_eq!(canonical.as_rgb(), &img);
    }

    #[test]
    fn test_grayscale_becomes_rgb() {
        let img = GrayImage::from_pixel(3, 3, Luma([128]));
        let bytes = encode(&DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let canonical = normalize(&bytes).unwrap();
        assert_eq!(canonical.channel_count(), 3);
        assert_eq!(canonical.as_rgb().get_pixel(1, 1), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_alpha_is_dropped() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 40]));
        let bytes = encode(&DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let canonical = normalize(&bytes).unwrap();
        assert_eq!(canonical.as_rgb().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_tiff_and_jpeg_decode() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([0, 200, 0])));

        let tiff = normalize(&encode(&img, ImageFormat::Tiff)).unwrap();
        assert_eq!((tiff.width(), tiff.height()), (8, 6));

        let jpeg = normalize(&encode(&img, ImageFormat::Jpeg)).unwrap();
        assert_eq!((jpeg.width(), jpeg.height()), (8, 6));
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 8, Rgb([90, 90, 90])));
        let jpeg = encode(&img, ImageFormat::Jpeg);

        // 6 = rotate 90 degrees clockwise
        let canonical = normalize(&with_exif_orientation(&jpeg, 6)).unwrap();
        assert_eq!((canonical.width(), canonical.height()), (8, 16));

        // 1 = already upright
        let upright = normalize(&with_exif_orientation(&jpeg, 1)).unwrap();
        assert_eq!((upright.width(), upright.height()), (16, 8));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let img = RgbaImage::from_pixel(5, 7, Rgba([1, 2, 3, 255]));
        let first = normalize(&encode(&DynamicImage::ImageRgba8(img), ImageFormat::Png)).unwrap();

        let second = normalize(&first.encode_png().unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.channel_count(), 3);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(normalize(b""), Err(PipelineError::Decode(_))));
        assert!(matches!(
            normalize(b"definitely not an image"),
            Err(PipelineError::Decode(_))
        ));

        // Valid PNG signature, truncated body
        let mut truncated =
            encode(&DynamicImage::ImageRgb8(RgbImage::new(4, 4)), ImageFormat::Png);
        truncated.truncate(20);
        assert!(matches!(normalize(&truncated), Err(PipelineError::Decode(_))));
    }
}
