//! Chroma-key background removal for generated sticker frames
//!
//! Sticker images come back from the generation model with the subject
//! framed by a near-uniform dark background. The background is found as the
//! set of dark pixels 4-connected to the image border, and its alpha is
//! ramped down by brightness. Dark pixels that belong to the subject (ink,
//! shadows, dark materials) are enclosed by brighter pixels, are never
//! reached by the fill, and keep their alpha.

use crate::{
    config::RemovalConfig,
    error::{RemuseError, Result},
    types::BackgroundMask,
};
use image::{Rgba, RgbaImage};
use instant::Instant;
use tracing::{debug, instrument};

/// Euclidean magnitude of a pixel's RGB channels, 0 to ~441.67
#[must_use]
pub fn brightness(pixel: &Rgba<u8>) -> f32 {
    let [r, g, b, _] = pixel.0;
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    (r * r + g * g + b * b).sqrt()
}

/// Alpha for a confirmed background pixel of the given brightness
///
/// 0 at or below `threshold_low`, then a linear ramp reaching 255 at
/// `threshold_low + feather_width`.
#[must_use]
pub fn feathered_alpha(brightness: f32, config: &RemovalConfig) -> u8 {
    if brightness <= config.threshold_low {
        return 0;
    }
    let ratio = (brightness - config.threshold_low) / config.feather_width;
    (ratio * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Compute the border-connected background mask for an image
///
/// # Errors
/// - Zero width or height
/// - Invalid removal configuration
pub fn detect_background(image: &RgbaImage, config: &RemovalConfig) -> Result<BackgroundMask> {
    check_dimensions(image)?;
    config.validate()?;

    let (width, height) = image.dimensions();
    let levels: Vec<f32> = image.pixels().map(brightness).collect();
    Ok(BackgroundMask::flood_from_borders(
        &levels,
        width,
        height,
        config.candidate_limit(),
    ))
}

/// Remove the dark, border-connected background from a sticker frame
///
/// Returns a new buffer of the same dimensions; the input is never modified.
/// Only the alpha channel of confirmed background pixels changes, and it only
/// ever decreases, so running the function on its own output changes nothing
/// further.
///
/// # Errors
/// - `RemuseError::InvalidImage` for zero width or height
/// - `RemuseError::InvalidConfig` for out-of-range thresholds
///
/// # Examples
/// ```rust
/// use image::{Rgba, RgbaImage};
/// use remuse::{remove_background, RemovalConfig};
///
/// let mut frame = RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 255]));
/// frame.put_pixel(2, 2, Rgba([250, 40, 40, 255]));
///
/// let sticker = remove_background(&frame, &RemovalConfig::default()).unwrap();
/// assert_eq!(sticker.get_pixel(0, 0)[3], 0);
/// assert_eq!(sticker.get_pixel(2, 2)[3], 255);
/// ```
#[instrument(
    skip(image, config),
    fields(
        dimensions = %format!("{}x{}", image.width(), image.height()),
        threshold = config.threshold_low,
        feather = config.feather_width
    )
)]
pub fn remove_background(image: &RgbaImage, config: &RemovalConfig) -> Result<RgbaImage> {
    let start = Instant::now();
    let mask = detect_background(image, config)?;

    let mut output = image.clone();
    for (idx, pixel) in output.pixels_mut().enumerate() {
        if mask.is_background_index(idx) {
            let ramp = feathered_alpha(brightness(pixel), config);
            pixel.0[3] = pixel.0[3].min(ramp);
        }
    }

    debug!(
        background_pixels = mask.background_count(),
        coverage = %format!("{:.1}%", mask.coverage() * 100.0),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Background removed"
    );

    Ok(output)
}

/// Decode image bytes and remove the background
///
/// # Errors
/// - `RemuseError::ImageDecode` when the bytes are not a decodable image
/// - Any error from [`remove_background`]
pub fn remove_background_from_bytes(bytes: &[u8], config: &RemovalConfig) -> Result<RgbaImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| RemuseError::image_decode(format!("Failed to decode sticker frame: {}", e)))?;
    remove_background(&image.to_rgba8(), config)
}

fn check_dimensions(image: &RgbaImage) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(RemuseError::invalid_image(format!(
            "image dimensions must be non-zero, got {}x{}",
            width, height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// Black frame with a white square subject in the middle
    fn framed_subject(size: u32, margin: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let inside = x >= margin && y >= margin && x < size - margin && y < size - margin;
            if inside {
                WHITE
            } else {
                BLACK
            }
        })
    }

    #[test]
    fn test_brightness_scale() {
        assert_eq!(brightness(&BLACK), 0.0);
        assert!((brightness(&WHITE) - 441.672_94).abs() < 0.01);
        assert_eq!(brightness(&Rgba([30, 40, 0, 255])), 50.0);
    }

    #[test]
    fn test_feathered_alpha_ramp() {
        let config = RemovalConfig::default();
        assert_eq!(feathered_alpha(0.0, &config), 0);
        assert_eq!(feathered_alpha(60.0, &config), 0);
        assert_eq!(feathered_alpha(75.0, &config), 128);
        assert_eq!(feathered_alpha(90.0, &config), 255);
        assert_eq!(feathered_alpha(400.0, &config), 255);
    }

    #[test]
    fn test_uniform_background_becomes_transparent() {
        let image = framed_subject(10, 3);
        let result = remove_background(&image, &RemovalConfig::default()).unwrap();

        for (x, y, pixel) in result.enumerate_pixels() {
            if *image.get_pixel(x, y) == BLACK {
                assert_eq!(pixel[3], 0, "background at ({x},{y}) should be transparent");
            } else {
                assert_eq!(*pixel, WHITE, "subject at ({x},{y}) should be untouched");
            }
        }
    }

    #[test]
    fn test_enclosed_dark_island_is_kept() {
        let mut image = framed_subject(11, 2);
        // Black ink printed in the middle of the white subject
        image.put_pixel(5, 5, BLACK);
        image.put_pixel(5, 6, BLACK);

        let result = remove_background(&image, &RemovalConfig::default()).unwrap();
        assert_eq!(result.get_pixel(5, 5)[3], 255);
        assert_eq!(result.get_pixel(5, 6)[3], 255);
        assert_eq!(result.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_feathered_edge_pixels() {
        let mut image = RgbaImage::from_pixel(7, 1, BLACK);
        // brightness 50, 75 and 100 on a path connected to the left border
        image.put_pixel(1, 0, Rgba([30, 40, 0, 255]));
        image.put_pixel(2, 0, Rgba([45, 60, 0, 255]));
        image.put_pixel(3, 0, Rgba([60, 80, 0, 255]));
        image.put_pixel(4, 0, WHITE);

        let result = remove_background(&image, &RemovalConfig::default()).unwrap();
        assert_eq!(result.get_pixel(1, 0)[3], 0);
        assert_eq!(result.get_pixel(2, 0)[3], 128);
        // above the candidate limit: not background, alpha untouched
        assert_eq!(result.get_pixel(3, 0)[3], 255);
        assert_eq!(result.get_pixel(4, 0)[3], 255);
        // right border side is black again and gets cleared
        assert_eq!(result.get_pixel(6, 0)[3], 0);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let image = framed_subject(6, 2);
        let before = image.clone();
        let _ = remove_background(&image, &RemovalConfig::default()).unwrap();
        assert_eq!(image, before);
    }

    #[test]
    fn test_idempotent_rgb() {
        let mut image = framed_subject(12, 3);
        image.put_pixel(0, 5, Rgba([40, 50, 30, 255]));
        let once = remove_background(&image, &RemovalConfig::default()).unwrap();
        let twice = remove_background(&once, &RemovalConfig::default()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let image = RgbaImage::new(0, 4);
        let err = remove_background(&image, &RemovalConfig::default()).unwrap_err();
        assert!(matches!(err, RemuseError::InvalidImage(_)));
    }

    #[test]
    fn test_undecodable_bytes_rejected() {
        let err = remove_background_from_bytes(b"not an image", &RemovalConfig::default())
            .unwrap_err();
        assert!(matches!(err, RemuseError::ImageDecode(_)));
    }

    #[test]
    fn test_detect_background_counts() {
        let image = framed_subject(8, 2);
        let mask = detect_background(&image, &RemovalConfig::default()).unwrap();
        assert_eq!(mask.dimensions(), (8, 8));
        assert_eq!(mask.background_count(), 64 - 16);
    }
}
