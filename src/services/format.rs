//! Output format handling service
//!
//! Encodes finished sticker buffers into the format requested by the caller.

use crate::{
    config::OutputFormat,
    error::{RemuseError, Result},
    services::io::ImageIOService,
};
use image::RgbaImage;

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Get the appropriate file extension for a given output format
    ///
    /// # Examples
    /// ```rust
    /// use remuse::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Rgba8), "raw");
    /// ```
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Rgba8 => "raw",
        }
    }

    /// Check if a format supports transparency (alpha channel)
    ///
    /// Every format the engine emits carries alpha.
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Rgba8 => true,
        }
    }

    /// Encode an RGBA buffer into bytes of the given format
    ///
    /// # Errors
    /// - Encoder failure
    /// - `RemuseError::UnsupportedFormat` for WebP when built without `webp-support`
    pub fn encode(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
        match format {
            OutputFormat::Png => ImageIOService::encode_png(image),
            OutputFormat::Rgba8 => Ok(image.as_raw().clone()),
            OutputFormat::WebP => Self::encode_webp(image),
        }
    }

    #[cfg(feature = "webp-support")]
    fn encode_webp(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        image
            .write_to(
                &mut std::io::Cursor::new(&mut buffer),
                image::ImageFormat::WebP,
            )
            .map_err(|e| RemuseError::processing(format!("Failed to encode WebP: {}", e)))?;
        Ok(buffer)
    }

    #[cfg(not(feature = "webp-support"))]
    fn encode_webp(_image: &RgbaImage) -> Result<Vec<u8>> {
        Err(RemuseError::unsupported_format(
            "WebP output requires the webp-support feature",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_get_extension() {
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
        assert_eq!(
            OutputFormatHandler::get_extension(OutputFormat::WebP),
            "webp"
        );
        assert_eq!(
            OutputFormatHandler::get_extension(OutputFormat::Rgba8),
            "raw"
        );
    }

    #[test]
    fn test_supports_transparency() {
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Png));
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::WebP));
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Rgba8));
    }

    #[test]
    fn test_encode_raw_and_png() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 0]));
        let raw = OutputFormatHandler::encode(&image, OutputFormat::Rgba8).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(&raw[..4], &[1, 2, 3, 0]);

        let png = OutputFormatHandler::encode(&image, OutputFormat::Png).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[cfg(feature = "webp-support")]
    #[test]
    fn test_encode_webp() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([200, 0, 0, 255]));
        let webp = OutputFormatHandler::encode(&image, OutputFormat::WebP).unwrap();
        assert_eq!(&webp[..4], b"RIFF");
    }
}
