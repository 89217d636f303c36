//! Image I/O operations service
//!
//! This module separates file I/O operations from the pipeline and the
//! removal engine, making both testable without touching the filesystem.

use crate::{
    error::{RemuseError, Result},
    pipeline::ImageInput,
};
use image::{DynamicImage, ImageEncoder, RgbaImage};
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Check if a file path has a supported image extension
    ///
    /// # Examples
    /// ```rust
    /// use remuse::services::ImageIOService;
    ///
    /// assert!(ImageIOService::is_supported_format("photo.JPG"));
    /// assert!(!ImageIOService::is_supported_format("notes.txt"));
    /// ```
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "heic" | "heif" | "bmp"
                )
            })
    }

    /// Read a photo from disk into a pipeline input
    ///
    /// The MIME type is guessed from the file content; the path becomes the
    /// preview handle and the file name the display name.
    ///
    /// # Errors
    /// - File missing or unreadable
    ///
    /// # Examples
    /// ```rust,no_run
    /// use remuse::services::ImageIOService;
    ///
    /// # async fn example() -> remuse::Result<()> {
    /// let input = ImageIOService::load_input("bottle.jpg").await?;
    /// println!("{} ({} bytes, {})", input.name, input.len(), input.mime_type);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load_input<P: AsRef<Path>>(path: P) -> Result<ImageInput> {
        let path_ref = path.as_ref();
        let bytes = tokio::fs::read(path_ref)
            .await
            .map_err(|e| RemuseError::file_io_error("read image file", path_ref, &e))?;

        let name = path_ref
            .file_name()
            .and_then(|n| n.to_str())
            .map_or_else(|| path_ref.display().to_string(), str::to_string);

        log::debug!("Loaded {} ({} bytes)", path_ref.display(), bytes.len());
        Ok(ImageInput::new(name, bytes).with_preview(path_ref.display().to_string()))
    }

    /// Load an image from bytes
    ///
    /// # Errors
    /// - `RemuseError::ImageDecode` when the bytes are not a decodable image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| {
            RemuseError::image_decode(format!("Failed to decode image from bytes: {}", e))
        })
    }

    /// Encode an RGBA image as PNG, keeping the alpha channel
    ///
    /// # Errors
    /// - `RemuseError::Processing` when encoding fails
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| RemuseError::processing(format!("Failed to encode PNG: {}", e)))?;
        Ok(buffer)
    }

    /// Save an RGBA image as PNG, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or write failure
    /// - Encoding failure
    pub fn save_png<P: AsRef<Path>>(image: &RgbaImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RemuseError::file_io_error("create output directory", parent, &e)
            })?;
        }

        let bytes = Self::encode_png(image)?;
        std::fs::write(path_ref, bytes)
            .map_err(|e| RemuseError::file_io_error("write PNG", path_ref, &e))
    }

    /// Write raw bytes, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or write failure
    pub async fn write_bytes<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RemuseError::file_io_error("create output directory", parent, &e)
            })?;
        }

        tokio::fs::write(path_ref, bytes)
            .await
            .map_err(|e| RemuseError::file_io_error("write file", path_ref, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn test_is_supported_format() {
        assert!(ImageIOService::is_supported_format("a.jpg"));
        assert!(ImageIOService::is_supported_format("a.JPEG"));
        assert!(ImageIOService::is_supported_format("dir/a.webp"));
        assert!(ImageIOService::is_supported_format("a.heic"));
        assert!(!ImageIOService::is_supported_format("a.gif"));
        assert!(!ImageIOService::is_supported_format("no_extension"));
    }

    #[test]
    fn test_encode_png_keeps_alpha() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 77]));
        let bytes = ImageIOService::encode_png(&image).unwrap();
        let decoded = ImageIOService::load_from_bytes(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(1, 1)[3], 77);
    }

    #[test]
    fn test_load_from_bytes_rejects_garbage() {
        assert!(matches!(
            ImageIOService::load_from_bytes(b"nope"),
            Err(RemuseError::ImageDecode(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("frame.png");
        let image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        ImageIOService::save_png(&image, &path).unwrap();

        let input = ImageIOService::load_input(&path).await.unwrap();
        assert_eq!(input.name, "frame.png");
        assert_eq!(input.mime_type, "image/png");
        assert_eq!(input.preview.as_deref(), Some(path.display().to_string().as_str()));
        assert!(!input.is_empty());
    }

    #[tokio::test]
    async fn test_load_input_missing_file() {
        let dir = tempdir().unwrap();
        let err = ImageIOService::load_input(dir.path().join("missing.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemuseError::Io(_)));
        assert!(err.to_string().contains("read image file"));
    }

    #[tokio::test]
    async fn test_write_bytes_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("out.json");
        ImageIOService::write_bytes(&path, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
    }
}
