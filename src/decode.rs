//! Data-URL payload decoding.
//!
//! Browsers hand canvas snapshots over as `data:image/png;base64,<payload>`.
//! [`decode_data_url`] strips the header, base64-decodes the payload and
//! loads the bytes as a raster image.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`decode_data_url`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The string has no `,` separating header and payload.
    #[error("malformed payload: expected `<header>,<base64>`")]
    MalformedPayload,

    /// The payload is not valid base64.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The decoded bytes are not a loadable image.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// A decoded raster image plus the container format it arrived in.
///
/// Clones share the pixel buffer, so handing one to a blocking task is cheap.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: Arc<DynamicImage>,
    format: ImageFormat,
}

impl DecodedImage {
    /// Wrap an already-loaded image (used by tests and embedders).
    pub fn new(image: DynamicImage, format: ImageFormat) -> Self {
        Self {
            image: Arc::new(image),
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Container format detected from the payload bytes.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Re-encode as PNG, downscaling so neither side exceeds `max_dimension`.
    ///
    /// Aspect ratio is preserved. A `max_dimension` of 0 disables scaling.
    pub fn encode_png(&self, max_dimension: u32) -> Result<Vec<u8>, image::ImageError> {
        let needs_resize = max_dimension > 0
            && (self.image.width() > max_dimension || self.image.height() > max_dimension);

        let rgba = if needs_resize {
            DynamicImage::ImageRgba8(
                self.image
                    .resize(max_dimension, max_dimension, FilterType::Triangle)
                    .to_rgba8(),
            )
        } else {
            DynamicImage::ImageRgba8(self.image.to_rgba8())
        };

        let mut out = Cursor::new(Vec::new());
        rgba.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Decode a `<header>,<base64-payload>` data-URL into an image.
///
/// The header is not interpreted. Whitespace inside the payload (line-wrapped
/// base64) is ignored.
///
/// # Examples
///
/// ```
/// use inkcalc::decode::{decode_data_url, DecodeError};
///
/// assert!(matches!(decode_data_url("no separator"), Err(DecodeError::MalformedPayload)));
/// ```
pub fn decode_data_url(data_url: &str) -> Result<DecodedImage, DecodeError> {
    let (_header, payload) = data_url
        .split_once(',')
        .ok_or(DecodeError::MalformedPayload)?;

    let compact: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD
        .decode(&compact)
        .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

    let format =
        image::guess_format(&bytes).map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    let image = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    Ok(DecodedImage::new(image, format))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// A black canvas as a PNG data-URL, the shape browsers send.
    pub(crate) fn canvas_data_url(width: u32, height: u32) -> String {
        let canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes.into_inner()))
    }

    #[test]
    fn decodes_png_canvas() {
        let decoded = decode_data_url(&canvas_data_url(8, 4)).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 4);
        assert_eq!(decoded.format(), ImageFormat::Png);
    }

    #[test]
    fn missing_comma_is_malformed() {
        let result = decode_data_url("data:image/png;base64");
        assert!(matches!(result, Err(DecodeError::MalformedPayload)));
    }

    #[test]
    fn bad_base64_is_invalid_encoding() {
        let result = decode_data_url("data:image/png;base64,@@not-base64@@");
        assert!(matches!(result, Err(DecodeError::InvalidEncoding(_))));
    }

    #[test]
    fn non_image_bytes_are_unsupported() {
        let payload = STANDARD.encode(b"just some text, definitely not pixels");
        let result = decode_data_url(&format!("data:text/plain;base64,{}", payload));
        assert!(matches!(result, Err(DecodeError::UnsupportedFormat(_))));
    }

    #[test]
    fn wrapped_base64_is_accepted() {
        let url = canvas_data_url(2, 2);
        let (header, payload) = url.split_once(',').unwrap();
        let wrapped: String = payload
            .as_bytes()
            .chunks(16)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        let decoded = decode_data_url(&format!("{},{}", header, wrapped)).unwrap();
        assert_eq!(decoded.width(), 2);
    }

    #[test]
    fn encode_png_downscales_large_images() {
        let decoded = decode_data_url(&canvas_data_url(64, 32)).unwrap();
        let png = decoded.encode_png(16).unwrap();
        let reloaded = image::load_from_memory(&png).unwrap();
        assert_eq!(reloaded.width(), 16);
        assert_eq!(reloaded.height(), 8);
    }

    #[test]
    fn encode_png_keeps_small_images() {
        let decoded = decode_data_url(&canvas_data_url(10, 10)).unwrap();
        let png = decoded.encode_png(1024).unwrap();
        let reloaded = image::load_from_memory(&png).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (10, 10));
    }
}
